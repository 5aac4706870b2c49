//! Route table and lookup.
//!
//! # Responsibilities
//! - Compile route patterns from configuration at startup
//! - Resolve `(method, path)` to a route descriptor with path parameters
//! - Distinguish 404 (no pattern matched) from 405 (wrong method)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Linear scan over routes pre-sorted by priority then specificity
//! - Deterministic: same input always matches same route
//! - Construction fails on ambiguous route tables instead of picking one

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use axum::http::Method;
use url::Url;

use crate::config::{RateLimitRule, RetryConfig, RouteConfig, TimeoutConfig};
use crate::error::GatewayError;
use crate::routing::pattern::{normalize_path, param_value_ok, CompiledPattern};

/// A compiled route descriptor; immutable after startup.
#[derive(Debug)]
pub struct Route {
    pub id: String,
    pub pattern: CompiledPattern,
    pub methods: HashSet<Method>,
    pub upstream: Url,
    pub auth_required: bool,
    pub permissions: Vec<Vec<String>>,
    pub rate_limit: Option<RateLimitRule>,
    pub timeouts: Option<TimeoutConfig>,
    pub retry: Option<RetryConfig>,
    pub pass_session: bool,
    pub refresh_allowed: bool,
    pub priority: u32,
}

/// A matched route with extracted path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// Error raised while building the route table.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterBuildError(pub String);

impl std::fmt::Display for RouterBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Route table error: {}", self.0)
    }
}

impl std::error::Error for RouterBuildError {}

/// Routes incoming requests to configured route descriptors.
#[derive(Debug)]
pub struct Router {
    /// Routes sorted by priority, then specificity.
    routes: Vec<Arc<Route>>,
}

impl Router {
    /// Compile the route table from configuration.
    ///
    /// Fails when a pattern is malformed or two routes with equal priority
    /// share a pattern shape and an overlapping method set.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, RouterBuildError> {
        let mut routes = Vec::with_capacity(configs.len());

        for config in configs {
            let pattern = CompiledPattern::compile(&config.path)
                .map_err(|e| RouterBuildError(format!("route '{}': {}", config.id, e)))?;

            let mut methods = HashSet::new();
            for m in &config.methods {
                let method: Method = m.to_ascii_uppercase().parse().map_err(|_| {
                    RouterBuildError(format!("route '{}': invalid method '{}'", config.id, m))
                })?;
                methods.insert(method);
            }

            let upstream = Url::parse(&config.upstream).map_err(|e| {
                RouterBuildError(format!("route '{}': invalid upstream: {}", config.id, e))
            })?;

            routes.push(Arc::new(Route {
                id: config.id.clone(),
                pattern,
                methods,
                upstream,
                auth_required: config.auth_required,
                permissions: config.permissions.clone(),
                rate_limit: config.rate_limit.clone(),
                timeouts: config.timeouts,
                retry: config.retry.clone(),
                pass_session: config.pass_session,
                refresh_allowed: config.refresh_allowed,
                priority: config.priority,
            }));
        }

        // Ambiguity check: same priority, same pattern shape, overlapping methods.
        for (i, a) in routes.iter().enumerate() {
            for b in routes.iter().skip(i + 1) {
                if a.priority == b.priority
                    && a.pattern.shape_eq(&b.pattern)
                    && !a.methods.is_disjoint(&b.methods)
                {
                    return Err(RouterBuildError(format!(
                        "routes '{}' and '{}' overlap on pattern '{}' with shared methods",
                        a.id, b.id, a.pattern.pattern
                    )));
                }
            }
        }

        // Sort by priority, then specificity: more literal segments first,
        // wildcard-free before wildcard, longer patterns before shorter.
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.pattern.literal_count().cmp(&a.pattern.literal_count()))
                .then(a.pattern.has_wildcard().cmp(&b.pattern.has_wildcard()))
                .then(b.pattern.segments.len().cmp(&a.pattern.segments.len()))
                .then(b.pattern.pattern.len().cmp(&a.pattern.pattern.len()))
        });

        tracing::info!(route_count = routes.len(), "Route table compiled");

        Ok(Self { routes })
    }

    /// Resolve `(method, path)` to a route and extracted parameters.
    ///
    /// The path is normalized before matching. Captured values containing
    /// control characters or traversal segments are rejected outright.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch, GatewayError> {
        let normalized = normalize_path(path);
        let mut path_matched = false;
        let mut allowed: BTreeSet<String> = BTreeSet::new();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(&normalized) else {
                continue;
            };
            path_matched = true;

            if !route.methods.contains(method) {
                for m in &route.methods {
                    allowed.insert(m.as_str().to_string());
                }
                continue;
            }

            for (name, value) in &params {
                if !param_value_ok(value) {
                    tracing::warn!(
                        route_id = %route.id,
                        param = %name,
                        "Rejected path parameter"
                    );
                    return Err(GatewayError::BadRequest(
                        "Invalid path parameter".to_string(),
                    ));
                }
            }

            return Ok(RouteMatch {
                route: route.clone(),
                params,
            });
        }

        if path_matched {
            let allow = allowed
                .into_iter()
                .filter_map(|m| m.parse().ok())
                .collect();
            Err(GatewayError::MethodNotAllowed { allow })
        } else {
            Err(GatewayError::RouteNotFound)
        }
    }

    /// All compiled routes, in match order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }
}
