//! Session token extraction.
//!
//! Precedence is fixed: the session cookie first, then
//! `Authorization: Bearer`. Requests carrying both use the cookie.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

/// Extracts session tokens from request headers.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    cookie_name: String,
}

impl TokenExtractor {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    /// Extract a token, trying the cookie before the Bearer header.
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        self.from_cookie(headers).or_else(|| self.from_bearer(headers))
    }

    fn from_cookie(&self, headers: &HeaderMap) -> Option<String> {
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let name = parts.next()?;
                if name == self.cookie_name {
                    let token = parts.next().unwrap_or("").trim();
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
        None
    }

    fn from_bearer(&self, headers: &HeaderMap) -> Option<String> {
        let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = raw.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}
