//! Panic recovery.
//!
//! Catches any panic from deeper stages and converts it to a
//! `500 internal_error`. The cause is logged at ERROR with the
//! correlation id; the client sees only the generic message.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::error::GatewayError;
use crate::pipeline::{respond_error, Next, RequestContext, Stage};

pub struct RecoveryStage;

#[async_trait]
impl Stage for RecoveryStage {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        match AssertUnwindSafe(next.run(request, ctx)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    correlation_id = %ctx.correlation_id,
                    client_ip = %ctx.client_ip,
                    cause = %cause,
                    "Panic in request pipeline"
                );
                respond_error(ctx, GatewayError::Internal(cause))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use axum::http::Method;
    use std::sync::Arc;

    struct Exploding;

    #[async_trait]
    impl Stage for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        async fn handle(
            &self,
            _request: Request<Body>,
            _ctx: &mut RequestContext,
            _next: Next<'_>,
        ) -> Response<Body> {
            panic!("boom at depth");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let pipeline = Pipeline::new(vec![Arc::new(RecoveryStage), Arc::new(Exploding)]);
        let mut ctx =
            RequestContext::new(Method::GET, "/x".into(), "10.0.0.1".into(), "http");
        ctx.correlation_id = "req-1".into();

        let response = pipeline
            .dispatch(Request::new(Body::empty()), &mut ctx)
            .await;
        assert_eq!(response.status(), 500);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("internal_error"));
        assert!(!text.contains("boom at depth"));
    }
}
