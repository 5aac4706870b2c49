//! Rate limit enforcement stage.
//!
//! Evaluates the route's rule and either denies with 429 or lets the
//! request through, attaching `X-RateLimit-*` headers either way.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, Request, Response};

use crate::error::GatewayError;
use crate::observability::metrics;
use crate::pipeline::{respond_error, Next, RequestContext, Stage};
use crate::ratelimit::{RateLimitDecision, RateLimiter};

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

fn apply_headers(response: &mut Response<Body>, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from_str(&decision.limit.to_string()).expect("numeric header"),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).expect("numeric header"),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from_str(&decision.reset_secs.to_string()).expect("numeric header"),
    );
    if let Some(retry_after) = decision.retry_after_secs {
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&retry_after.to_string()).expect("numeric header"),
        );
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        let Some(route) = ctx.route.clone() else {
            return next.run(request, ctx).await;
        };

        let decision = self
            .limiter
            .check(&route, ctx.principal.as_ref(), &ctx.client_ip)
            .await;

        let Some(decision) = decision else {
            return next.run(request, ctx).await;
        };
        ctx.rate_limit = Some(decision.clone());

        if !decision.allowed {
            metrics::record_rate_limited(&route.id);
            tracing::info!(
                correlation_id = %ctx.correlation_id,
                key = %decision.key,
                route_id = %route.id,
                "Rate limit exceeded"
            );
            let mut response = respond_error(
                ctx,
                GatewayError::RateLimitExceeded {
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                },
            );
            apply_headers(&mut response, &decision);
            return response;
        }

        let mut response = next.run(request, ctx).await;
        apply_headers(&mut response, &decision);
        response
    }
}
