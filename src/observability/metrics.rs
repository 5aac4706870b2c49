//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(
    method: &str,
    route_id: &str,
    status: u16,
    total: Duration,
    upstream: Option<Duration>,
) {
    let labels = [
        ("method", method.to_string()),
        ("route", route_id.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(total.as_secs_f64());
    if let Some(upstream) = upstream {
        histogram!("gateway_upstream_duration_seconds", "route" => route_id.to_string())
            .record(upstream.as_secs_f64());
    }
}

/// Record an authentication failure by reason code.
pub fn record_auth_failure(reason: &'static str) {
    counter!("gateway_auth_failures_total", "reason" => reason).increment(1);
}

/// Record a rate limit denial by rule scope.
pub fn record_rate_limited(scope: &str) {
    counter!("gateway_rate_limit_denials_total", "rule" => scope.to_string()).increment(1);
}

/// Record an upstream error by kind.
pub fn record_upstream_error(kind: &'static str, route_id: &str) {
    counter!(
        "gateway_upstream_errors_total",
        "kind" => kind,
        "route" => route_id.to_string()
    )
    .increment(1);
}

/// Track requests currently inside the pipeline.
pub fn set_in_flight(count: usize) {
    gauge!("gateway_in_flight_requests").set(count as f64);
}

/// Track requests currently waiting on an upstream.
pub fn upstream_in_use_delta(delta: f64) {
    gauge!("gateway_upstream_in_use").increment(delta);
}

/// Store availability gauges flipped by the health prober.
pub fn set_store_available(store: &'static str, available: bool) {
    gauge!("gateway_store_available", "store" => store).set(if available { 1.0 } else { 0.0 });
}
