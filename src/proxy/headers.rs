//! Header manipulation for forwarded requests and responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers, including those named in `Connection`
//! - Rewrite Host to the upstream authority
//! - Append X-Forwarded-For, set X-Forwarded-Proto and X-Request-ID
//! - Strip the session cookie unless the route passes it through
//! - Reject CR/LF smuggling in inbound header values
//! - Add gateway-owned security headers without overriding the upstream

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::GatewayError;

/// Hop-by-hop headers that must never be forwarded by a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reject any header value containing CR or LF octets.
///
/// The http crate already refuses them in parsed values; this guards
/// the invariant explicitly at the trust boundary.
pub fn validate_headers(headers: &HeaderMap) -> Result<(), GatewayError> {
    for (name, value) in headers {
        if value.as_bytes().iter().any(|b| *b == b'\r' || *b == b'\n') {
            tracing::warn!(header = %name, "Rejected header containing CR/LF");
            return Err(GatewayError::BadRequest(
                "Invalid request header".to_string(),
            ));
        }
    }
    Ok(())
}

/// Build the header map forwarded upstream.
#[allow(clippy::too_many_arguments)]
pub fn prepare_upstream_headers(
    inbound: &HeaderMap,
    upstream_authority: &str,
    client_ip: &str,
    scheme: &str,
    correlation_id: &str,
    session_cookie: &str,
    pass_session: bool,
) -> HeaderMap {
    // Headers named by Connection are hop-by-hop for this hop.
    let mut connection_named: Vec<String> = Vec::new();
    for value in inbound.get_all(header::CONNECTION) {
        if let Ok(raw) = value.to_str() {
            connection_named.extend(raw.split(',').map(|s| s.trim().to_ascii_lowercase()));
        }
    }

    let mut out = HeaderMap::with_capacity(inbound.len() + 4);
    for (name, value) in inbound {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || connection_named.iter().any(|c| c == lower) {
            continue;
        }
        if name == header::HOST {
            continue;
        }
        if name == header::COOKIE && !pass_session {
            if let Some(filtered) = strip_cookie(value, session_cookie) {
                out.append(header::COOKIE, filtered);
            }
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Ok(host) = HeaderValue::from_str(upstream_authority) {
        out.insert(header::HOST, host);
    }

    // Append, never replace, the client address.
    let forwarded_for = match inbound.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        out.insert("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        out.insert("x-forwarded-proto", value);
    }
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        out.insert("x-request-id", value);
    }

    out
}

/// Remove one cookie pair from a Cookie header value. Returns None when
/// nothing remains.
fn strip_cookie(value: &HeaderValue, cookie_name: &str) -> Option<HeaderValue> {
    let raw = value.to_str().ok()?;
    let remaining: Vec<&str> = raw
        .split(';')
        .map(str::trim)
        .filter(|pair| {
            pair.split('=')
                .next()
                .map(|name| name != cookie_name)
                .unwrap_or(true)
        })
        .collect();

    if remaining.is_empty() {
        None
    } else {
        HeaderValue::from_str(&remaining.join("; ")).ok()
    }
}

/// Gateway-owned security headers, added only when the upstream did not
/// set them itself.
pub fn append_security_headers(headers: &mut HeaderMap, csp: Option<&str>) {
    const DEFAULTS: &[(&str, &str)] = &[
        ("strict-transport-security", "max-age=31536000; includeSubDomains"),
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
    ];

    for (name, value) in DEFAULTS {
        let name = HeaderName::from_static(name);
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
    if let Some(csp) = csp {
        let name = HeaderName::from_static("content-security-policy");
        if !headers.contains_key(&name) {
            if let Ok(value) = HeaderValue::from_str(csp) {
                headers.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.example"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-internal"));
        headers.insert("x-internal", HeaderValue::from_static("secret"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("session_token=abc; theme=dark"),
        );
        headers
    }

    #[test]
    fn test_hop_by_hop_stripped() {
        let out = prepare_upstream_headers(
            &inbound(),
            "users.internal:8000",
            "10.0.0.1",
            "http",
            "req-1",
            "session_token",
            false,
        );
        assert!(!out.contains_key(header::CONNECTION));
        assert!(!out.contains_key(header::TE));
        // Named in Connection, therefore hop-by-hop for this hop.
        assert!(!out.contains_key("x-internal"));
        assert_eq!(out[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_host_rewritten_and_forwarding_headers_set() {
        let out = prepare_upstream_headers(
            &inbound(),
            "users.internal:8000",
            "10.0.0.1",
            "https",
            "req-1",
            "session_token",
            false,
        );
        assert_eq!(out[header::HOST], "users.internal:8000");
        assert_eq!(out["x-forwarded-for"], "10.0.0.1");
        assert_eq!(out["x-forwarded-proto"], "https");
        assert_eq!(out["x-request-id"], "req-1");
    }

    #[test]
    fn test_forwarded_for_appends() {
        let mut headers = inbound();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let out = prepare_upstream_headers(
            &headers,
            "u:80",
            "10.0.0.1",
            "http",
            "req-1",
            "session_token",
            false,
        );
        assert_eq!(out["x-forwarded-for"], "203.0.113.9, 10.0.0.1");
    }

    #[test]
    fn test_session_cookie_stripped_unless_passed() {
        let out = prepare_upstream_headers(
            &inbound(),
            "u:80",
            "10.0.0.1",
            "http",
            "req-1",
            "session_token",
            false,
        );
        assert_eq!(out[header::COOKIE], "theme=dark");

        let out = prepare_upstream_headers(
            &inbound(),
            "u:80",
            "10.0.0.1",
            "http",
            "req-1",
            "session_token",
            true,
        );
        assert_eq!(out[header::COOKIE], "session_token=abc; theme=dark");
    }

    #[test]
    fn test_cookie_header_dropped_when_only_session() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session_token=abc"));
        let out = prepare_upstream_headers(
            &headers,
            "u:80",
            "10.0.0.1",
            "http",
            "req-1",
            "session_token",
            false,
        );
        assert!(!out.contains_key(header::COOKIE));
    }

    #[test]
    fn test_security_headers_do_not_override_upstream() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
        append_security_headers(&mut headers, Some("default-src 'self'"));

        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["content-security-policy"], "default-src 'self'");
    }
}
