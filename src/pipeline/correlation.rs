//! Correlation id injection.
//!
//! Accepts a client-supplied `X-Request-ID` when it is printable ASCII
//! of at most 128 characters; otherwise generates a fresh random
//! 128-bit URL-safe id. The id is fixed before any later stage runs and
//! echoed on every response.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::pipeline::{Next, RequestContext, Stage};

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_ID_LEN: usize = 128;

pub struct CorrelationStage;

fn acceptable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.bytes().all(|b| (0x21..=0x7e).contains(&b))
}

fn generate() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Resolve the correlation id for a request: the client-supplied value
/// when acceptable, else a fresh one. Also used by the admission
/// rejection path, which never reaches the pipeline.
pub fn resolve(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| acceptable(id))
        .map(str::to_string)
        .unwrap_or_else(generate)
}

#[async_trait]
impl Stage for CorrelationStage {
    fn name(&self) -> &'static str {
        "correlation"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        ctx.correlation_id = resolve(request.headers());

        let mut response = next.run(request, ctx).await;

        if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptable_ids() {
        assert!(acceptable("req-abc-123"));
        assert!(!acceptable(""));
        assert!(!acceptable(&"x".repeat(129)));
        assert!(!acceptable("has space"));
        assert!(!acceptable("ctl\u{7}char"));
    }

    #[test]
    fn test_generated_ids_unique_and_urlsafe() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(acceptable(&a));
    }
}
