//! Rate limit evaluation.
//!
//! Picks the applicable rule (per-route, else global default), derives
//! the key, evaluates the configured algorithm against the shared
//! store, and reports a decision with the header values the pipeline
//! emits. Store failures follow the rule's fail-open policy.

use std::sync::Arc;

use crate::auth::Principal;
use crate::config::{RateLimitAlgorithm, RateLimitConfig, RateLimitRule};
use crate::ratelimit::key::derive_key;
use crate::ratelimit::store::{now_f64, RateLimitStore, RateLimitStoreError};
use crate::routing::Route;

const FAIL_CLOSED_RETRY_AFTER_SECS: u64 = 60;

/// Outcome of a rate limit check, carrying everything the response
/// headers need.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u64,
    pub reset_secs: u64,
    /// Present on denial.
    pub retry_after_secs: Option<u64>,
    pub key: String,
    /// True when the decision came from the fail policy, not the store.
    pub degraded: bool,
}

/// Evaluates rate limit rules against the shared store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check the request against the route's rule. None means no rule
    /// applies and the request proceeds without rate limit headers.
    pub async fn check(
        &self,
        route: &Route,
        principal: Option<&Principal>,
        client_ip: &str,
    ) -> Option<RateLimitDecision> {
        if !self.config.enabled {
            return None;
        }

        let (rule, scope) = match (&route.rate_limit, &self.config.default) {
            (Some(rule), _) => (rule, route.id.as_str()),
            (None, Some(rule)) => (rule, "default"),
            (None, None) => return None,
        };

        let key = derive_key(&rule.key, scope, &route.id, principal, client_ip);

        match self.evaluate(rule, &key).await {
            Ok(decision) => Some(decision),
            Err(err) => {
                let fail_open = rule
                    .fail_open
                    .unwrap_or_else(|| {
                        // Public routes default to open, protected to the
                        // configured global flag.
                        if route.auth_required {
                            self.config.fail_open
                        } else {
                            true
                        }
                    });
                tracing::error!(
                    key = %key,
                    route_id = %route.id,
                    fail_open,
                    error = %err,
                    "Rate limit store failure"
                );
                Some(self.fail_outcome(rule, key, fail_open))
            }
        }
    }

    async fn evaluate(
        &self,
        rule: &RateLimitRule,
        key: &str,
    ) -> Result<RateLimitDecision, RateLimitStoreError> {
        let now = now_f64();
        let window = rule.window_secs;

        match rule.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                let capacity = rule.burst.unwrap_or(rule.limit) as f64;
                let refill_rate = rule.limit as f64 / window as f64;
                let d = self
                    .store
                    .token_bucket_consume(key, capacity, refill_rate, now)
                    .await?;
                Ok(RateLimitDecision {
                    allowed: d.allowed,
                    limit: rule.limit,
                    remaining: d.remaining,
                    reset_secs: d.reset_secs,
                    retry_after_secs: (!d.allowed).then_some(d.reset_secs.max(1)),
                    key: key.to_string(),
                    degraded: false,
                })
            }
            RateLimitAlgorithm::FixedWindow => {
                let (count, reset_secs) = self.store.window_increment(key, window, now).await?;
                let allowed = count <= rule.limit as u64;
                Ok(RateLimitDecision {
                    allowed,
                    limit: rule.limit,
                    remaining: (rule.limit as u64).saturating_sub(count),
                    reset_secs,
                    retry_after_secs: (!allowed).then_some(reset_secs.max(1)),
                    key: key.to_string(),
                    degraded: false,
                })
            }
            RateLimitAlgorithm::SlidingWindow => {
                let current_start = (now as u64) / window * window;
                let previous_start = current_start.saturating_sub(window);
                let elapsed = now - current_start as f64;
                let weight = 1.0 - (elapsed / window as f64);

                let previous = self.store.window_count(key, previous_start).await?;
                let (current, reset_secs) =
                    self.store.window_increment(key, window, now).await?;

                let weighted = previous as f64 * weight + current as f64;
                let allowed = weighted <= rule.limit as f64;
                let remaining = (rule.limit as f64 - weighted).max(0.0) as u64;
                Ok(RateLimitDecision {
                    allowed,
                    limit: rule.limit,
                    remaining,
                    reset_secs,
                    retry_after_secs: (!allowed).then_some(reset_secs.max(1)),
                    key: key.to_string(),
                    degraded: false,
                })
            }
        }
    }

    fn fail_outcome(&self, rule: &RateLimitRule, key: String, fail_open: bool) -> RateLimitDecision {
        if fail_open {
            RateLimitDecision {
                allowed: true,
                limit: rule.limit,
                remaining: rule.limit as u64,
                reset_secs: 0,
                retry_after_secs: None,
                key,
                degraded: true,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                limit: rule.limit,
                remaining: 0,
                reset_secs: FAIL_CLOSED_RETRY_AFTER_SECS,
                retry_after_secs: Some(FAIL_CLOSED_RETRY_AFTER_SECS),
                key,
                degraded: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::ratelimit::store::InMemoryRateLimitStore;
    use crate::routing::Router;

    fn route(rule: Option<RateLimitRule>, auth_required: bool) -> Arc<Route> {
        let config = RouteConfig {
            id: "r".into(),
            path: "/v1/x".into(),
            methods: vec!["GET".into()],
            upstream: "http://127.0.0.1:9000".into(),
            auth_required,
            permissions: Vec::new(),
            rate_limit: rule,
            timeouts: None,
            retry: None,
            pass_session: false,
            refresh_allowed: true,
            priority: 0,
        };
        Router::from_config(&[config]).unwrap().routes()[0].clone()
    }

    fn bucket_rule(limit: u32, burst: Option<u32>) -> RateLimitRule {
        RateLimitRule {
            algorithm: RateLimitAlgorithm::TokenBucket,
            limit,
            window_secs: 60,
            burst,
            key: "{ip}".into(),
            fail_open: None,
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimitConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_no_rule_no_decision() {
        let limiter = limiter();
        let route = route(None, false);
        assert!(limiter.check(&route, None, "10.0.0.1").await.is_none());
    }

    #[tokio::test]
    async fn test_bucket_denies_after_burst() {
        let limiter = limiter();
        let route = route(Some(bucket_rule(1, Some(3))), false);

        for _ in 0..3 {
            let d = limiter.check(&route, None, "10.0.0.1").await.unwrap();
            assert!(d.allowed);
        }
        let d = limiter.check(&route, None, "10.0.0.1").await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.retry_after_secs.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_keys_are_isolated_per_ip() {
        let limiter = limiter();
        let route = route(Some(bucket_rule(1, Some(1))), false);

        assert!(limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
        assert!(!limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
        // A different client still has its own bucket.
        assert!(limiter.check(&route, None, "10.0.0.2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_fixed_window_counts() {
        let limiter = limiter();
        let rule = RateLimitRule {
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit: 2,
            window_secs: 60,
            burst: None,
            key: "{ip}".into(),
            fail_open: None,
        };
        let route = route(Some(rule), false);

        assert!(limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
        assert!(limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
        let d = limiter.check(&route, None, "10.0.0.1").await.unwrap();
        assert!(!d.allowed);
        assert!(d.reset_secs <= 60);
    }

    #[tokio::test]
    async fn test_global_default_rule_applies() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let config = RateLimitConfig {
            default: Some(bucket_rule(1, Some(1))),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(store, config);
        let route = route(None, false);

        assert!(limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
        assert!(!limiter.check(&route, None, "10.0.0.1").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_skips() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(store, config);
        let route = route(Some(bucket_rule(1, Some(1))), false);
        assert!(limiter.check(&route, None, "10.0.0.1").await.is_none());
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl RateLimitStore for FailingStore {
        async fn token_bucket_consume(
            &self,
            _: &str,
            _: f64,
            _: f64,
            _: f64,
        ) -> Result<crate::ratelimit::store::BucketDecision, RateLimitStoreError> {
            Err(RateLimitStoreError::Unavailable("down".into()))
        }
        async fn window_increment(
            &self,
            _: &str,
            _: u64,
            _: f64,
        ) -> Result<(u64, u64), RateLimitStoreError> {
            Err(RateLimitStoreError::Unavailable("down".into()))
        }
        async fn window_count(&self, _: &str, _: u64) -> Result<u64, RateLimitStoreError> {
            Err(RateLimitStoreError::Unavailable("down".into()))
        }
        async fn ping(&self) -> Result<(), RateLimitStoreError> {
            Err(RateLimitStoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_fail_open_on_public_route() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), RateLimitConfig::default());
        let route = route(Some(bucket_rule(1, Some(1))), false);

        let d = limiter.check(&route, None, "10.0.0.1").await.unwrap();
        assert!(d.allowed);
        assert!(d.degraded);
    }

    #[tokio::test]
    async fn test_fail_closed_on_protected_route() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), RateLimitConfig::default());
        let route = route(Some(bucket_rule(1, Some(1))), true);

        let d = limiter.check(&route, None, "10.0.0.1").await.unwrap();
        assert!(!d.allowed);
        assert!(d.degraded);
        assert_eq!(d.retry_after_secs, Some(60));
    }
}
