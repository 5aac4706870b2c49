//! Rate limit key derivation.
//!
//! A rule declares a key template composed from `{ip}`, `{user}`,
//! `{route}` and literal text. `{route}` always expands to the matched
//! route id, never the raw path, keeping key cardinality bounded.
//! `{user}` without an authenticated principal falls back to the
//! client IP.

use crate::auth::Principal;

/// Expand a key template for one request. `scope` namespaces the key by
/// the owning rule (route id, or "default" for the global fallback).
pub fn derive_key(
    template: &str,
    scope: &str,
    route_id: &str,
    principal: Option<&Principal>,
    client_ip: &str,
) -> String {
    let user_part = match principal {
        Some(p) => format!("user:{}", p.user_id),
        None => format!("ip:{}", client_ip),
    };

    let expanded = template
        .replace("{ip}", &format!("ip:{}", client_ip))
        .replace("{user}", &user_part)
        .replace("{route}", &format!("route:{}", route_id));

    format!("{}:{}", scope, expanded)
}
