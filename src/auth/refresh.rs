//! Sliding token refresh.
//!
//! When a validated session is close to expiry and the route permits
//! refresh, the gateway extends it: opaque sessions get a new id (the
//! old one is revoked before the new token is returned, so the two can
//! never be used in parallel), signed tokens are re-signed with a
//! pushed-out `exp`. The new token travels back as a Set-Cookie.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::token::{self, Claims};
use crate::auth::validator::ResolvedKind;
use crate::auth::Principal;
use crate::config::{CookieSecure, SessionConfig};
use crate::error::GatewayError;
use crate::session::{now_secs, SessionStore};

/// A freshly minted token plus its Set-Cookie header value.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub token: String,
    pub set_cookie: String,
}

/// Refreshes sessions nearing expiry.
pub struct TokenRefresher {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    secret: Option<Vec<u8>>,
    secure_cookies: bool,
}

impl TokenRefresher {
    /// `tls_enabled` feeds the Secure cookie flag when the policy is Auto.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig, tls_enabled: bool) -> Self {
        let secure_cookies = match config.cookie_secure {
            CookieSecure::Auto => tls_enabled,
            CookieSecure::Always => true,
            CookieSecure::Never => false,
        };
        let secret = config.signing_secret.as_ref().map(|s| s.as_bytes().to_vec());
        Self {
            store,
            config,
            secret,
            secure_cookies,
        }
    }

    /// Whether this principal is due for refresh.
    pub fn should_refresh(&self, principal: &Principal, route_allows: bool) -> bool {
        if !self.config.refresh_enabled || !route_allows {
            return false;
        }
        let remaining = principal.expires_at.saturating_sub(now_secs());
        remaining < self.config.refresh_threshold_secs
    }

    /// Refresh the session, returning the new token and cookie.
    pub async fn refresh(
        &self,
        principal: &Principal,
        kind: ResolvedKind,
    ) -> Result<Option<RefreshedToken>, GatewayError> {
        match kind {
            ResolvedKind::Opaque => self.refresh_opaque(principal).await,
            ResolvedKind::Signed => self.refresh_signed(principal),
        }
    }

    async fn refresh_opaque(
        &self,
        principal: &Principal,
    ) -> Result<Option<RefreshedToken>, GatewayError> {
        let now = now_secs();
        let old_id = &principal.session_id;

        let Some(mut record) = self.store.get(old_id).await.map_err(store_unavailable)? else {
            // Session vanished between validation and refresh; let the
            // request proceed on the still-valid principal.
            return Ok(None);
        };

        let new_id = Uuid::new_v4().simple().to_string();
        record.session_id = new_id.clone();
        record.last_access_at = now;
        record.expires_at = now + self.config.token_ttl_secs;

        let ttl = Duration::from_secs(self.config.token_ttl_secs);
        self.store.put(&record, ttl).await.map_err(store_unavailable)?;

        // Revoke the old id before the new token leaves the gateway.
        self.store.revoke(old_id).await.map_err(store_unavailable)?;

        tracing::info!(
            old_session_id = %old_id,
            user_id = %record.user_id,
            "Session refreshed"
        );

        Ok(Some(self.package(new_id)))
    }

    fn refresh_signed(
        &self,
        principal: &Principal,
    ) -> Result<Option<RefreshedToken>, GatewayError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(None);
        };

        let now = now_secs();
        let claims = Claims {
            sub: principal.user_id.clone(),
            sid: principal.session_id.clone(),
            iat: principal.issued_at,
            nbf: None,
            exp: now + self.config.token_ttl_secs,
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        };
        let new_token = token::sign(&claims, secret);

        tracing::info!(
            session_id = %principal.session_id,
            user_id = %principal.user_id,
            "Signed token re-issued"
        );

        Ok(Some(self.package(new_token)))
    }

    fn package(&self, token: String) -> RefreshedToken {
        let mut set_cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.config.cookie_name, token, self.config.token_ttl_secs
        );
        if self.secure_cookies {
            set_cookie.push_str("; Secure");
        }
        RefreshedToken { token, set_cookie }
    }
}

fn store_unavailable(err: crate::session::StoreError) -> GatewayError {
    tracing::error!(error = %err, "Session store error during refresh");
    GatewayError::ServiceUnavailable {
        retry_after_secs: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, SessionRecord, SessionStore};
    use std::collections::HashMap;

    fn session_config() -> SessionConfig {
        SessionConfig {
            signing_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
            refresh_threshold_secs: 300,
            token_ttl_secs: 3600,
            ..SessionConfig::default()
        }
    }

    fn principal(expires_in: u64) -> Principal {
        let now = now_secs();
        Principal {
            user_id: "u1".into(),
            session_id: "sess-old".into(),
            roles: vec![],
            permissions: vec![],
            issued_at: now,
            expires_at: now + expires_in,
            bound_ip: None,
        }
    }

    #[tokio::test]
    async fn test_should_refresh_threshold() {
        let store = Arc::new(InMemorySessionStore::new());
        let refresher = TokenRefresher::new(store, session_config(), false);

        assert!(refresher.should_refresh(&principal(100), true));
        assert!(!refresher.should_refresh(&principal(1000), true));
        assert!(!refresher.should_refresh(&principal(100), false));
    }

    #[tokio::test]
    async fn test_opaque_refresh_revokes_old_id() {
        let store = Arc::new(InMemorySessionStore::new());
        let now = now_secs();
        store
            .put(
                &SessionRecord {
                    session_id: "sess-old".into(),
                    user_id: "u1".into(),
                    created_at: now - 3500,
                    last_access_at: now,
                    expires_at: now + 100,
                    revoked: false,
                    roles: vec![],
                    permissions: vec![],
                    bound_ip: None,
                    rotated_at: None,
                    metadata: HashMap::new(),
                },
                Duration::from_secs(100),
            )
            .await
            .unwrap();

        let refresher = TokenRefresher::new(store.clone(), session_config(), false);
        let refreshed = refresher
            .refresh(&principal(100), ResolvedKind::Opaque)
            .await
            .unwrap()
            .unwrap();

        assert_ne!(refreshed.token, "sess-old");
        assert!(store.is_revoked("sess-old").await.unwrap());
        let new_record = store.get(&refreshed.token).await.unwrap().unwrap();
        assert_eq!(new_record.user_id, "u1");
        assert!(new_record.expires_at > now + 3000);
        assert!(refreshed.set_cookie.contains("HttpOnly"));
        assert!(!refreshed.set_cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn test_secure_flag_follows_tls() {
        let store = Arc::new(InMemorySessionStore::new());
        let refresher = TokenRefresher::new(store, session_config(), true);
        let refreshed = refresher
            .refresh(&principal(100), ResolvedKind::Signed)
            .await
            .unwrap()
            .unwrap();
        assert!(refreshed.set_cookie.contains("; Secure"));
    }

    #[tokio::test]
    async fn test_signed_refresh_extends_exp() {
        let store = Arc::new(InMemorySessionStore::new());
        let config = session_config();
        let secret = config.signing_secret.clone().unwrap();
        let refresher = TokenRefresher::new(store, config, false);

        let refreshed = refresher
            .refresh(&principal(100), ResolvedKind::Signed)
            .await
            .unwrap()
            .unwrap();

        let claims = token::verify(&refreshed.token, secret.as_bytes()).unwrap();
        assert!(claims.exp > now_secs() + 3000);
        assert_eq!(claims.sub, "u1");
    }
}
