//! Per-route authorization.

use crate::auth::Principal;
use crate::error::GatewayError;
use crate::routing::Route;

/// Enforces route permission policy against a validated principal.
#[derive(Debug, Clone)]
pub struct Authorizer {
    super_roles: Vec<String>,
}

impl Authorizer {
    /// `super_roles` pass every permission check unconditionally.
    pub fn new(super_roles: Vec<String>) -> Self {
        Self { super_roles }
    }

    /// Allow iff the route requires no permissions, the principal covers
    /// one of the route's permission sets, or the principal holds a
    /// super role. The unmet requirement is logged, never returned.
    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        route: &Route,
    ) -> Result<(), GatewayError> {
        if route.permissions.is_empty() {
            return Ok(());
        }

        let Some(principal) = principal else {
            tracing::info!(route_id = %route.id, "Permission check with no principal");
            return Err(GatewayError::PermissionDenied);
        };

        if principal
            .roles
            .iter()
            .any(|role| self.super_roles.contains(role))
        {
            return Ok(());
        }

        let satisfied = route.permissions.iter().any(|set| {
            set.iter()
                .all(|perm| principal.permissions.iter().any(|held| held == perm))
        });

        if satisfied {
            Ok(())
        } else {
            tracing::info!(
                route_id = %route.id,
                user_id = %principal.user_id,
                required = ?route.permissions,
                "Authorization denied"
            );
            Err(GatewayError::PermissionDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::routing::Router;
    use crate::session::now_secs;
    use std::sync::Arc;

    fn route_with_permissions(permissions: Vec<Vec<String>>) -> Arc<Route> {
        let config = RouteConfig {
            id: "r".into(),
            path: "/v1/x".into(),
            methods: vec!["GET".into()],
            upstream: "http://127.0.0.1:9000".into(),
            auth_required: true,
            permissions,
            rate_limit: None,
            timeouts: None,
            retry: None,
            pass_session: false,
            refresh_allowed: true,
            priority: 0,
        };
        Router::from_config(&[config]).unwrap().routes()[0].clone()
    }

    fn principal(roles: &[&str], permissions: &[&str]) -> Principal {
        let now = now_secs();
        Principal {
            user_id: "u1".into(),
            session_id: "s1".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            issued_at: now,
            expires_at: now + 600,
            bound_ip: None,
        }
    }

    #[test]
    fn test_no_permissions_required() {
        let auth = Authorizer::new(vec!["admin".into()]);
        let route = route_with_permissions(vec![]);
        assert!(auth.authorize(None, &route).is_ok());
    }

    #[test]
    fn test_any_of_semantics() {
        let auth = Authorizer::new(vec!["admin".into()]);
        let route = route_with_permissions(vec![
            vec!["users.read".into(), "users.write".into()],
            vec!["audit.read".into()],
        ]);

        // Covers the second set.
        let p = principal(&["user"], &["audit.read"]);
        assert!(auth.authorize(Some(&p), &route).is_ok());

        // Covers only half of the first set.
        let p = principal(&["user"], &["users.read"]);
        assert!(matches!(
            auth.authorize(Some(&p), &route),
            Err(GatewayError::PermissionDenied)
        ));
    }

    #[test]
    fn test_super_role_bypasses() {
        let auth = Authorizer::new(vec!["admin".into()]);
        let route = route_with_permissions(vec![vec!["users.write".into()]]);
        let p = principal(&["admin"], &[]);
        assert!(auth.authorize(Some(&p), &route).is_ok());
    }

    #[test]
    fn test_missing_principal_denied() {
        let auth = Authorizer::new(vec![]);
        let route = route_with_permissions(vec![vec!["users.read".into()]]);
        assert!(matches!(
            auth.authorize(None, &route),
            Err(GatewayError::PermissionDenied)
        ));
    }
}
