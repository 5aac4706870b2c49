//! Configuration validation logic.

use std::collections::HashSet;

use crate::config::schema::{GatewayConfig, TokenKind};

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "TRACE",
];

/// Validate a GatewayConfig for semantic correctness.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Route identifiers must be unique
    let mut seen_ids = HashSet::new();
    for route in &config.routes {
        if !seen_ids.insert(route.id.as_str()) {
            errors.push(ValidationError(format!(
                "Duplicate route id '{}'",
                route.id
            )));
        }
    }

    // 2. Per-route checks: methods, upstream URL, rate limit rule
    for route in &config.routes {
        if route.methods.is_empty() {
            errors.push(ValidationError(format!(
                "Route '{}' declares no methods",
                route.id
            )));
        }
        for method in &route.methods {
            if !KNOWN_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                errors.push(ValidationError(format!(
                    "Route '{}' declares unknown method '{}'",
                    route.id, method
                )));
            }
        }
        match url::Url::parse(&route.upstream) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(ValidationError(format!(
                "Route '{}' upstream has unsupported scheme '{}'",
                route.id,
                u.scheme()
            ))),
            Err(e) => errors.push(ValidationError(format!(
                "Route '{}' upstream URL is invalid: {}",
                route.id, e
            ))),
        }
        if let Some(rule) = &route.rate_limit {
            validate_rule(&route.id, rule.limit, rule.window_secs, &mut errors);
        }
    }

    // 3. Signed tokens require a signing secret of at least 32 bytes
    match (&config.session.token_kind, &config.session.signing_secret) {
        (TokenKind::Signed, None) => errors.push(ValidationError(
            "session.signing_secret is required when session.token_kind is 'signed'".to_string(),
        )),
        (TokenKind::Signed | TokenKind::Auto, Some(secret)) if secret.len() < 32 => {
            errors.push(ValidationError(
                "session.signing_secret must be at least 32 bytes".to_string(),
            ))
        }
        (TokenKind::Auto, None) => {
            tracing::warn!(
                "session.token_kind is 'auto' without a signing secret; signed tokens will be rejected"
            );
        }
        _ => {}
    }

    // 4. Global default rate limit rule
    if let Some(rule) = &config.rate_limit.default {
        validate_rule("rate_limit.default", rule.limit, rule.window_secs, &mut errors);
    }

    // 5. TLS settings
    if let Some(tls) = &config.server.tls {
        if tls.enabled {
            if tls.cert.is_empty() || tls.key.is_empty() {
                errors.push(ValidationError(
                    "server.tls requires cert and key paths when enabled".to_string(),
                ));
            }
            if tls.min_version != "1.2" && tls.min_version != "1.3" {
                errors.push(ValidationError(format!(
                    "server.tls.min_version must be '1.2' or '1.3', got '{}'",
                    tls.min_version
                )));
            }
        }
    }

    // 6. Admission control and timeouts
    if config.server.max_in_flight == 0 {
        errors.push(ValidationError(
            "server.max_in_flight must be > 0".to_string(),
        ));
    }
    if config.upstream.timeouts.overall_ms == 0 {
        tracing::warn!("upstream.timeouts.overall_ms is 0, requests will time out immediately");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rule(owner: &str, limit: u32, window_secs: u64, errors: &mut Vec<ValidationError>) {
    if limit == 0 {
        errors.push(ValidationError(format!(
            "{}: rate limit must be > 0",
            owner
        )));
    }
    if window_secs == 0 {
        errors.push(ValidationError(format!(
            "{}: rate limit window must be > 0 seconds",
            owner
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn route(id: &str) -> RouteConfig {
        RouteConfig {
            id: id.into(),
            path: "/v1/ping".into(),
            methods: vec!["GET".into()],
            upstream: "http://127.0.0.1:9000".into(),
            auth_required: false,
            permissions: Vec::new(),
            rate_limit: None,
            timeouts: None,
            retry: None,
            pass_session: false,
            refresh_allowed: true,
            priority: 0,
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("ping"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_route_id() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("ping"));
        config.routes.push(route("ping"));

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("Duplicate route id")));
    }

    #[test]
    fn test_invalid_upstream_scheme() {
        let mut config = GatewayConfig::default();
        let mut r = route("ftp");
        r.upstream = "ftp://files.example.com".into();
        config.routes.push(r);

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("unsupported scheme")));
    }

    #[test]
    fn test_signed_tokens_require_secret() {
        let mut config = GatewayConfig::default();
        config.session.token_kind = TokenKind::Signed;

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("signing_secret")));
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = GatewayConfig::default();
        config.session.token_kind = TokenKind::Signed;
        config.session.signing_secret = Some("short".into());

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("at least 32 bytes")));
    }
}
