//! Session token validation.
//!
//! Validates opaque tokens against the session store and signed tokens
//! by HMAC verification, applying the checks in a fixed order so each
//! failure maps to a distinct client code:
//! parse → signature → nbf → exp → revocation → IP binding → idle.
//!
//! Validated signed-token principals are cached in a small TTL-bounded
//! LRU keyed by token hash; cache hits still consult the revocation
//! list so a revoked session dies within one store round-trip.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::auth::token::{self, SignedTokenError};
use crate::auth::Principal;
use crate::config::{SessionConfig, TokenKind};
use crate::error::GatewayError;
use crate::session::{now_secs, SessionStore, StoreError};

const PRINCIPAL_CACHE_CAPACITY: usize = 1024;
const PRINCIPAL_CACHE_TTL: Duration = Duration::from_secs(15);
const STORE_RETRY_AFTER_SECS: u64 = 5;

/// Token shape resolved for a concrete token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedKind {
    Opaque,
    Signed,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone)]
pub struct Validated {
    pub principal: Principal,
    pub kind: ResolvedKind,
}

/// Validates session tokens and produces principals.
pub struct TokenValidator {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    secret: Option<Vec<u8>>,
    cache: Mutex<LruCache<String, (Principal, Instant)>>,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        let secret = config.signing_secret.as_ref().map(|s| s.as_bytes().to_vec());
        Self {
            store,
            config,
            secret,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PRINCIPAL_CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        }
    }

    /// Validate a raw token against the client IP.
    pub async fn validate(
        &self,
        raw_token: &str,
        client_ip: &str,
    ) -> Result<Validated, GatewayError> {
        let kind = self.resolve_kind(raw_token);
        match kind {
            ResolvedKind::Signed => self.validate_signed(raw_token).await,
            ResolvedKind::Opaque => self.validate_opaque(raw_token, client_ip).await,
        }
    }

    fn resolve_kind(&self, raw_token: &str) -> ResolvedKind {
        match self.config.token_kind {
            TokenKind::Opaque => ResolvedKind::Opaque,
            TokenKind::Signed => ResolvedKind::Signed,
            TokenKind::Auto => {
                if token::looks_signed(raw_token) {
                    ResolvedKind::Signed
                } else {
                    ResolvedKind::Opaque
                }
            }
        }
    }

    async fn validate_signed(&self, raw_token: &str) -> Result<Validated, GatewayError> {
        let cache_key = token_hash(raw_token);

        if let Some(principal) = self.cache_lookup(&cache_key) {
            if self.check_revocation(&principal.session_id).await? {
                self.cache_remove(&cache_key);
                return Err(GatewayError::TokenRevoked);
            }
            return Ok(Validated {
                principal,
                kind: ResolvedKind::Signed,
            });
        }

        let Some(secret) = self.secret.as_deref() else {
            tracing::warn!("Signed token received but no signing secret is configured");
            return Err(GatewayError::InvalidToken);
        };

        let claims = match token::verify(raw_token, secret) {
            Ok(claims) => claims,
            Err(SignedTokenError::BadSignature) => {
                tracing::warn!(
                    security_event = "signature_mismatch",
                    "Signed token failed signature verification"
                );
                return Err(GatewayError::InvalidToken);
            }
            Err(_) => return Err(GatewayError::InvalidToken),
        };

        let now = now_secs();
        if let Some(nbf) = claims.nbf {
            if nbf > now {
                return Err(GatewayError::InvalidToken);
            }
        }
        if now >= claims.exp {
            return Err(GatewayError::TokenExpired);
        }
        if self.check_revocation(&claims.sid).await? {
            return Err(GatewayError::TokenRevoked);
        }

        let principal = Principal {
            user_id: claims.sub,
            session_id: claims.sid,
            roles: claims.roles,
            permissions: claims.permissions,
            issued_at: claims.iat,
            expires_at: claims.exp,
            bound_ip: None,
        };

        self.cache_insert(cache_key, principal.clone());

        Ok(Validated {
            principal,
            kind: ResolvedKind::Signed,
        })
    }

    async fn validate_opaque(
        &self,
        raw_token: &str,
        client_ip: &str,
    ) -> Result<Validated, GatewayError> {
        let record = self
            .store
            .get(raw_token)
            .await
            .map_err(map_store_error)?
            .ok_or(GatewayError::InvalidToken)?;

        let now = now_secs();
        if record.is_expired(now) {
            return Err(GatewayError::TokenExpired);
        }
        if record.revoked || self.check_revocation(&record.session_id).await? {
            return Err(GatewayError::TokenRevoked);
        }
        if self.config.bind_ip {
            match &record.bound_ip {
                Some(bound) if bound == client_ip => {}
                Some(_) => {
                    tracing::warn!(
                        security_event = "session_ip_mismatch",
                        session_id = %record.session_id,
                        "Session bound to a different client IP"
                    );
                    return Err(GatewayError::SessionMismatch);
                }
                None => {}
            }
        }
        if let Some(idle_ttl) = self.config.idle_ttl_secs {
            if now.saturating_sub(record.last_access_at) > idle_ttl {
                return Err(GatewayError::SessionIdle);
            }
        }
        // Fixation defense: refuse sessions created before the user's
        // last privilege rotation.
        if let Some(rotated_at) = record.rotated_at {
            if record.created_at < rotated_at {
                tracing::warn!(
                    security_event = "stale_session_after_rotation",
                    session_id = %record.session_id,
                    "Session predates privilege rotation"
                );
                return Err(GatewayError::InvalidToken);
            }
        }

        // Best-effort last-access update; never block the request on it.
        let store = self.store.clone();
        let session_id = record.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch(&session_id, now).await {
                tracing::warn!(session_id = %session_id, error = %e, "Session touch failed");
            }
        });

        let principal = Principal {
            user_id: record.user_id,
            session_id: record.session_id,
            roles: record.roles,
            permissions: record.permissions,
            issued_at: record.created_at,
            expires_at: record.expires_at,
            bound_ip: record.bound_ip,
        };

        Ok(Validated {
            principal,
            kind: ResolvedKind::Opaque,
        })
    }

    async fn check_revocation(&self, session_id: &str) -> Result<bool, GatewayError> {
        self.store
            .is_revoked(session_id)
            .await
            .map_err(map_store_error)
    }

    fn cache_lookup(&self, key: &str) -> Option<Principal> {
        let mut cache = self.cache.lock().expect("principal cache mutex poisoned");
        let stale = match cache.get(key) {
            Some((principal, inserted)) if inserted.elapsed() < PRINCIPAL_CACHE_TTL => {
                return Some(principal.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            cache.pop(key);
        }
        None
    }

    fn cache_insert(&self, key: String, principal: Principal) {
        let mut cache = self.cache.lock().expect("principal cache mutex poisoned");
        cache.put(key, (principal, Instant::now()));
    }

    fn cache_remove(&self, key: &str) {
        let mut cache = self.cache.lock().expect("principal cache mutex poisoned");
        cache.pop(key);
    }
}

fn map_store_error(err: StoreError) -> GatewayError {
    match err {
        StoreError::Unavailable(cause) => {
            tracing::error!(error = %cause, "Session store unavailable");
            GatewayError::ServiceUnavailable {
                retry_after_secs: STORE_RETRY_AFTER_SECS,
            }
        }
        StoreError::Corrupt(cause) => GatewayError::Internal(cause),
    }
}

fn token_hash(raw_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw_token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{sign, Claims};
    use crate::session::{InMemorySessionStore, SessionRecord};
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn config(kind: TokenKind) -> SessionConfig {
        SessionConfig {
            token_kind: kind,
            signing_secret: Some(SECRET.to_string()),
            ..SessionConfig::default()
        }
    }

    fn record(id: &str) -> SessionRecord {
        let now = now_secs();
        SessionRecord {
            session_id: id.into(),
            user_id: "u1".into(),
            created_at: now,
            last_access_at: now,
            expires_at: now + 3600,
            revoked: false,
            roles: vec!["user".into()],
            permissions: vec!["read".into()],
            bound_ip: None,
            rotated_at: None,
            metadata: HashMap::new(),
        }
    }

    async fn store_with(records: &[SessionRecord]) -> Arc<InMemorySessionStore> {
        let store = Arc::new(InMemorySessionStore::new());
        for rec in records {
            store.put(rec, Duration::from_secs(3600)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_opaque_token_valid() {
        let store = store_with(&[record("sess-1")]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Opaque));

        let validated = validator.validate("sess-1", "10.0.0.1").await.unwrap();
        assert_eq!(validated.principal.user_id, "u1");
        assert_eq!(validated.kind, ResolvedKind::Opaque);
    }

    #[tokio::test]
    async fn test_opaque_token_unknown() {
        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Opaque));
        assert!(matches!(
            validator.validate("nope", "10.0.0.1").await,
            Err(GatewayError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_opaque_token_revoked() {
        let store = store_with(&[record("sess-1")]).await;
        store.revoke("sess-1").await.unwrap();
        let validator = TokenValidator::new(store, config(TokenKind::Opaque));
        assert!(matches!(
            validator.validate("sess-1", "10.0.0.1").await,
            Err(GatewayError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_ip_binding_mismatch() {
        let mut rec = record("sess-1");
        rec.bound_ip = Some("10.0.0.1".into());
        let store = store_with(&[rec]).await;

        let mut cfg = config(TokenKind::Opaque);
        cfg.bind_ip = true;
        let validator = TokenValidator::new(store, cfg);

        assert!(validator.validate("sess-1", "10.0.0.1").await.is_ok());
        assert!(matches!(
            validator.validate("sess-1", "10.9.9.9").await,
            Err(GatewayError::SessionMismatch)
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let mut rec = record("sess-1");
        rec.last_access_at = now_secs() - 1000;
        let store = store_with(&[rec]).await;

        let mut cfg = config(TokenKind::Opaque);
        cfg.idle_ttl_secs = Some(600);
        let validator = TokenValidator::new(store, cfg);

        assert!(matches!(
            validator.validate("sess-1", "10.0.0.1").await,
            Err(GatewayError::SessionIdle)
        ));
    }

    #[tokio::test]
    async fn test_rotation_fixation_defense() {
        let now = now_secs();
        let mut rec = record("sess-1");
        rec.created_at = now - 100;
        rec.rotated_at = Some(now - 10);
        let store = store_with(&[rec]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Opaque));

        assert!(matches!(
            validator.validate("sess-1", "10.0.0.1").await,
            Err(GatewayError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_signed_token_valid_and_cached() {
        let now = now_secs();
        let claims = Claims {
            sub: "u1".into(),
            sid: "sess-1".into(),
            iat: now,
            nbf: None,
            exp: now + 600,
            roles: vec![],
            permissions: vec![],
        };
        let raw = sign(&claims, SECRET.as_bytes());

        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Auto));

        let first = validator.validate(&raw, "10.0.0.1").await.unwrap();
        assert_eq!(first.kind, ResolvedKind::Signed);
        let second = validator.validate(&raw, "10.0.0.1").await.unwrap();
        assert_eq!(second.principal.user_id, "u1");
    }

    #[tokio::test]
    async fn test_signed_token_revoked_after_cache() {
        let now = now_secs();
        let claims = Claims {
            sub: "u1".into(),
            sid: "sess-1".into(),
            iat: now,
            nbf: None,
            exp: now + 600,
            roles: vec![],
            permissions: vec![],
        };
        let raw = sign(&claims, SECRET.as_bytes());

        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store.clone(), config(TokenKind::Auto));

        validator.validate(&raw, "10.0.0.1").await.unwrap();
        store.revoke("sess-1").await.unwrap();

        assert!(matches!(
            validator.validate(&raw, "10.0.0.1").await,
            Err(GatewayError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_signed_token_expired() {
        let now = now_secs();
        let claims = Claims {
            sub: "u1".into(),
            sid: "sess-1".into(),
            iat: now - 700,
            nbf: None,
            exp: now - 100,
            roles: vec![],
            permissions: vec![],
        };
        let raw = sign(&claims, SECRET.as_bytes());

        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Auto));
        assert!(matches!(
            validator.validate(&raw, "10.0.0.1").await,
            Err(GatewayError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_signed_token_nbf_in_future() {
        let now = now_secs();
        let claims = Claims {
            sub: "u1".into(),
            sid: "sess-1".into(),
            iat: now,
            nbf: Some(now + 300),
            exp: now + 600,
            roles: vec![],
            permissions: vec![],
        };
        let raw = sign(&claims, SECRET.as_bytes());

        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Auto));
        assert!(matches!(
            validator.validate(&raw, "10.0.0.1").await,
            Err(GatewayError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_tampered_signed_token() {
        let now = now_secs();
        let claims = Claims {
            sub: "u1".into(),
            sid: "sess-1".into(),
            iat: now,
            nbf: None,
            exp: now + 600,
            roles: vec![],
            permissions: vec![],
        };
        let mut raw = sign(&claims, SECRET.as_bytes());
        // Flip the final character.
        let last = raw.pop().unwrap();
        raw.push(if last == 'A' { 'B' } else { 'A' });

        let store = store_with(&[]).await;
        let validator = TokenValidator::new(store, config(TokenKind::Auto));
        assert!(matches!(
            validator.validate(&raw, "10.0.0.1").await,
            Err(GatewayError::InvalidToken)
        ));
    }
}
