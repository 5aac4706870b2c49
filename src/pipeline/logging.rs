//! Request/response logging.
//!
//! Runs just inside recovery: records arrival at debug (headers
//! redacted) and emits the structured per-request record on the way
//! back, along with the request counters and latency histograms.
//! Bodies are never logged.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::observability::{metrics, redacted_headers};
use crate::pipeline::{Next, RequestContext, Stage};

pub struct LoggingStage {
    redact_headers: Vec<String>,
}

impl LoggingStage {
    pub fn new(redact_headers: Vec<String>) -> Self {
        Self { redact_headers }
    }
}

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        tracing::debug!(
            correlation_id = %ctx.correlation_id,
            method = %ctx.method,
            path = %ctx.raw_path,
            client_ip = %ctx.client_ip,
            headers = ?redacted_headers(request.headers(), &self.redact_headers),
            "Request received"
        );

        let response = next.run(request, ctx).await;

        let status = response.status().as_u16();
        let total = ctx.elapsed();
        let route_id = ctx.route_id().unwrap_or("-").to_string();

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            method = %ctx.method,
            path = ctx.normalized_path.as_deref().unwrap_or(&ctx.raw_path),
            route_id = %route_id,
            client_ip = %ctx.client_ip,
            status,
            total_duration_ms = total.as_millis() as u64,
            upstream_duration_ms = ctx.upstream_duration.map(|d| d.as_millis() as u64),
            user_id = ctx.principal.as_ref().map(|p| p.user_id.as_str()),
            session_id = ctx.principal.as_ref().map(|p| p.session_id.as_str()),
            rate_limit_key = ctx.rate_limit.as_ref().map(|d| d.key.as_str()),
            rate_limit_outcome = ctx.rate_limit.as_ref().map(|d| if d.allowed { "allowed" } else { "denied" }),
            "Request completed"
        );

        metrics::record_request(
            ctx.method.as_str(),
            &route_id,
            status,
            total,
            ctx.upstream_duration,
        );

        response
    }
}
