//! Store health probing and readiness state.
//!
//! # Responsibilities
//! - Periodically ping the session and rate-limit stores
//! - Track when each probe last succeeded
//! - Answer liveness (listener up) and readiness (probes fresh)
//!
//! # Design Decisions
//! - Probes run as a background task, never on the request path
//! - Readiness flips to unhealthy once a probe result goes stale
//! - Probe outcomes feed the store availability gauges

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::HealthConfig;
use crate::observability::metrics;
use crate::ratelimit::RateLimitStore;
use crate::session::SessionStore;

/// Shared health state read by the admin endpoints.
pub struct HealthState {
    listener_up: AtomicBool,
    session_ok_at: Mutex<Option<Instant>>,
    ratelimit_ok_at: Mutex<Option<Instant>>,
    freshness: Duration,
}

impl HealthState {
    pub fn new(freshness: Duration) -> Self {
        Self {
            listener_up: AtomicBool::new(false),
            session_ok_at: Mutex::new(None),
            ratelimit_ok_at: Mutex::new(None),
            freshness,
        }
    }

    pub fn mark_listener_up(&self) {
        self.listener_up.store(true, Ordering::Release);
    }

    /// Liveness: the listener has come up.
    pub fn live(&self) -> bool {
        self.listener_up.load(Ordering::Acquire)
    }

    /// Readiness: both store probes succeeded within the freshness
    /// window.
    pub fn ready(&self) -> bool {
        self.fresh(&self.session_ok_at) && self.fresh(&self.ratelimit_ok_at)
    }

    fn fresh(&self, slot: &Mutex<Option<Instant>>) -> bool {
        slot.lock()
            .expect("health state mutex poisoned")
            .map(|at| at.elapsed() <= self.freshness)
            .unwrap_or(false)
    }

    fn record_session(&self, ok: bool) {
        if ok {
            *self.session_ok_at.lock().expect("health state mutex poisoned") =
                Some(Instant::now());
        }
        metrics::set_store_available("session", ok);
    }

    fn record_ratelimit(&self, ok: bool) {
        if ok {
            *self
                .ratelimit_ok_at
                .lock()
                .expect("health state mutex poisoned") = Some(Instant::now());
        }
        metrics::set_store_available("rate_limit", ok);
    }
}

/// Background task pinging both stores on an interval.
pub struct HealthProber {
    session_store: Arc<dyn SessionStore>,
    ratelimit_store: Arc<dyn RateLimitStore>,
    state: Arc<HealthState>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        ratelimit_store: Arc<dyn RateLimitStore>,
        state: Arc<HealthState>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            session_store,
            ratelimit_store,
            state,
            interval: Duration::from_secs(config.probe_interval_secs.max(1)),
        }
    }

    /// Probe both stores once.
    pub async fn probe_once(&self) {
        match self.session_store.ping().await {
            Ok(()) => self.state.record_session(true),
            Err(e) => {
                tracing::warn!(error = %e, "Session store probe failed");
                self.state.record_session(false);
            }
        }
        match self.ratelimit_store.ping().await {
            Ok(()) => self.state.record_ratelimit(true),
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit store probe failed");
                self.state.record_ratelimit(false);
            }
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_once().await,
                _ = shutdown.recv() => {
                    tracing::debug!("Health prober stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::InMemoryRateLimitStore;
    use crate::session::InMemorySessionStore;

    #[tokio::test]
    async fn test_ready_after_probe() {
        let state = Arc::new(HealthState::new(Duration::from_secs(10)));
        let prober = HealthProber::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryRateLimitStore::new()),
            state.clone(),
            &HealthConfig::default(),
        );

        assert!(!state.ready());
        prober.probe_once().await;
        assert!(state.ready());
    }

    #[tokio::test]
    async fn test_readiness_goes_stale() {
        let state = Arc::new(HealthState::new(Duration::from_millis(20)));
        let prober = HealthProber::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryRateLimitStore::new()),
            state.clone(),
            &HealthConfig::default(),
        );

        prober.probe_once().await;
        assert!(state.ready());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.ready());
    }

    #[test]
    fn test_liveness_tracks_listener() {
        let state = HealthState::new(Duration::from_secs(10));
        assert!(!state.live());
        state.mark_listener_up();
        assert!(state.live());
    }
}
