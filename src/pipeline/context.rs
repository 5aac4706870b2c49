//! Per-request context threaded through the stage pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;

use crate::auth::validator::ResolvedKind;
use crate::auth::Principal;
use crate::ratelimit::RateLimitDecision;
use crate::routing::Route;

/// Append-only request state owned by the pipeline for the request's
/// lifetime. The correlation id is set by the first stage and never
/// changes afterwards.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlation id echoed in logs, the response and upstream calls.
    pub correlation_id: String,

    /// Arrival timestamp.
    pub received_at: Instant,

    /// Client socket address IP.
    pub client_ip: String,

    /// Inbound scheme ("http" or "https"), for X-Forwarded-Proto.
    pub scheme: &'static str,

    pub method: Method,

    /// Raw request path as received.
    pub raw_path: String,

    /// Normalized path, set by the route-resolve stage.
    pub normalized_path: Option<String>,

    /// Matched route, set by the route-resolve stage.
    pub route: Option<Arc<Route>>,

    /// Extracted path parameters.
    pub path_params: HashMap<String, String>,

    /// Validated caller, set by the auth stage.
    pub principal: Option<Principal>,

    /// Shape of the presented token, set by the auth stage.
    pub token_kind: Option<ResolvedKind>,

    /// Rate limit outcome, set by the rate-limit stage.
    pub rate_limit: Option<RateLimitDecision>,

    /// Time spent waiting on the upstream, set by the proxy stage.
    pub upstream_duration: Option<Duration>,
}

impl RequestContext {
    pub fn new(method: Method, raw_path: String, client_ip: String, scheme: &'static str) -> Self {
        Self {
            correlation_id: String::new(),
            received_at: Instant::now(),
            client_ip,
            scheme,
            method,
            raw_path,
            normalized_path: None,
            route: None,
            path_params: HashMap::new(),
            principal: None,
            token_kind: None,
            rate_limit: None,
            upstream_duration: None,
        }
    }

    /// Route id when a route has been matched.
    pub fn route_id(&self) -> Option<&str> {
        self.route.as_ref().map(|r| r.id.as_str())
    }

    /// Elapsed wall time since arrival.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }
}
