//! Stage pipeline.
//!
//! A stage is `(Request, Context, Next) → Response`. Stages chain in a
//! fixed order decided at startup; each may observe and call the rest
//! of the chain, rewrite the response on the way back, or short-circuit
//! with its own response.
//!
//! Fixed order (outside in): correlation → recovery → logging →
//! route-resolve → auth → authorize → rate-limit → proxy.
//!
//! # Design Decisions
//! - The order is a compile-time construction, not a plugin registry;
//!   per-route variation is data on the Route descriptor
//! - Domain failures become [`GatewayError`] values rendered through a
//!   single helper, so every error path logs the same fields

pub mod auth;
pub mod context;
pub mod correlation;
pub mod logging;
pub mod proxy;
pub mod ratelimit;
pub mod recovery;
pub mod resolve;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

pub use context::RequestContext;

use crate::error::GatewayError;

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Handle the request: observe, delegate to `next`, rewrite the
    /// returned response, or short-circuit.
    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body>;
}

/// Remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.
    pub async fn run(self, request: Request<Body>, ctx: &mut RequestContext) -> Response<Body> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(request, ctx, Next { stages: rest }).await,
            None => {
                // The proxy stage terminates every chain; reaching the
                // end means the pipeline was mis-assembled.
                respond_error(
                    ctx,
                    GatewayError::Internal("pipeline ended without a response".to_string()),
                )
            }
        }
    }
}

/// The assembled chain.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Assemble a pipeline from stages, outermost first.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        tracing::info!(
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Pipeline assembled"
        );
        Self { stages }
    }

    /// Dispatch one request through the chain.
    pub async fn dispatch(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
    ) -> Response<Body> {
        Next {
            stages: &self.stages,
        }
        .run(request, ctx)
        .await
    }
}

/// Convert a domain error into its HTTP response.
///
/// The single conversion point: every error path logs the correlation
/// id, client IP, route id when known, and the error kind. Tokens are
/// never logged.
pub fn respond_error(ctx: &RequestContext, err: GatewayError) -> Response<Body> {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(
            correlation_id = %ctx.correlation_id,
            client_ip = %ctx.client_ip,
            route_id = ctx.route_id().unwrap_or("-"),
            kind = err.code(),
            cause = err.cause().unwrap_or("-"),
            "Request failed"
        );
    } else {
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            client_ip = %ctx.client_ip,
            route_id = ctx.route_id().unwrap_or("-"),
            kind = err.code(),
            "Request rejected"
        );
    }
    err.into_response(&ctx.correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    struct Tag(&'static str);

    #[async_trait]
    impl Stage for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn handle(
            &self,
            request: Request<Body>,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Response<Body> {
            let mut response = next.run(request, ctx).await;
            let trail = match response.headers().get("x-trail") {
                Some(v) => format!("{},{}", v.to_str().unwrap(), self.0),
                None => self.0.to_string(),
            };
            response
                .headers_mut()
                .insert("x-trail", trail.parse().unwrap());
            response
        }
    }

    struct Terminal;

    #[async_trait]
    impl Stage for Terminal {
        fn name(&self) -> &'static str {
            "terminal"
        }

        async fn handle(
            &self,
            _request: Request<Body>,
            _ctx: &mut RequestContext,
            _next: Next<'_>,
        ) -> Response<Body> {
            Response::new(Body::from("done"))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "/x".into(), "10.0.0.1".into(), "http")
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let pipeline = Pipeline::new(vec![
            Arc::new(Tag("outer")),
            Arc::new(Tag("inner")),
            Arc::new(Terminal),
        ]);

        let mut ctx = ctx();
        let response = pipeline
            .dispatch(Request::new(Body::empty()), &mut ctx)
            .await;
        // Response path unwinds inner-to-outer.
        assert_eq!(response.headers()["x-trail"], "inner,outer");
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_internal_error() {
        let pipeline = Pipeline::new(vec![]);
        let mut ctx = ctx();
        let response = pipeline
            .dispatch(Request::new(Body::empty()), &mut ctx)
            .await;
        assert_eq!(response.status(), 500);
    }
}
