//! Retry eligibility rules.
//!
//! A forwarded request may be retried only when the method is
//! idempotent and the failure happened before any response byte was
//! received. Anything after first byte is never replayed.

use axum::http::Method;

/// Where in the upstream exchange a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Connection could not be established.
    Connect,
    /// Connected, but timed out before any response byte.
    BeforeResponse,
    /// Failure after response bytes started flowing.
    MidResponse,
}

impl FailurePhase {
    /// Only pre-response failures are safe to replay.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Connect | Self::BeforeResponse)
    }
}

/// Methods the gateway will ever retry. POST and PATCH are never
/// replayed regardless of failure phase.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}
