//! Gateway error taxonomy.
//!
//! Stages convert domain failures into [`GatewayError`] values; the
//! recovery stage is the single point that renders them as HTTP
//! responses. Client-visible bodies carry only the short code, a safe
//! message, the correlation id and a timestamp. Internal causes are
//! logged, never serialized.

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode};
use chrono::{SecondsFormat, Utc};
use thiserror::Error;

/// Error kinds produced by the request pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Session token is invalid")]
    InvalidToken,

    #[error("Session token is expired")]
    TokenExpired,

    #[error("Session has been revoked")]
    TokenRevoked,

    #[error("Session does not match this client")]
    SessionMismatch,

    #[error("Session idle timeout exceeded")]
    SessionIdle,

    #[error("Access denied")]
    PermissionDenied,

    #[error("The requested resource was not found")]
    RouteNotFound,

    #[error("Method not allowed for this path")]
    MethodNotAllowed { allow: Vec<Method> },

    #[error("Request payload too large")]
    PayloadTooLarge,

    #[error("Too many requests, please try again later")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("An unexpected error occurred")]
    Internal(String),

    #[error("Upstream request failed")]
    BadGateway,

    #[error("Upstream request timed out")]
    GatewayTimeout,

    #[error("Service temporarily unavailable")]
    ServiceUnavailable { retry_after_secs: u64 },
}

impl GatewayError {
    /// HTTP status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::SessionMismatch
            | Self::SessionIdle => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short client-facing code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
            Self::SessionMismatch => "session_mismatch",
            Self::SessionIdle => "session_idle",
            Self::PermissionDenied => "forbidden",
            Self::RouteNotFound => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::BadGateway => "bad_gateway",
            Self::GatewayTimeout => "gateway_timeout",
            Self::ServiceUnavailable { .. } => "service_unavailable",
        }
    }

    /// Internal cause for logging; never sent to clients.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Internal(cause) => Some(cause.as_str()),
            _ => None,
        }
    }

    /// Render the error as an HTTP response.
    ///
    /// The body is `{error, message, correlation_id, timestamp}`; headers
    /// carry Allow / Retry-After / WWW-Authenticate where applicable.
    pub fn into_response(self, correlation_id: &str) -> Response<Body> {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
            "correlation_id": correlation_id,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        let mut response = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json");

        match &self {
            Self::MethodNotAllowed { allow } => {
                let allow_value = allow
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                response = response.header(header::ALLOW, allow_value);
            }
            Self::RateLimitExceeded { retry_after_secs }
            | Self::ServiceUnavailable { retry_after_secs } => {
                response = response.header(header::RETRY_AFTER, retry_after_secs.to_string());
            }
            _ => {}
        }
        if status == StatusCode::UNAUTHORIZED {
            response = response.header(header::WWW_AUTHENTICATE, "Bearer");
        }

        let mut response = response
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Body::from("internal error"));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            });
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}
