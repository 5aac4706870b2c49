//! Structured logging setup and header redaction.
//!
//! # Design Decisions
//! - tracing with EnvFilter; config level is the default, the
//!   RUST_LOG environment variable wins
//! - JSON output for production, pretty for development
//! - Sensitive header values never reach a log line

use axum::http::HeaderMap;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Initialize the global tracing subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gatehouse={}", config.level)));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Render headers for debug logs with configured names redacted.
pub fn redacted_headers(headers: &HeaderMap, redact: &[String]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let redacted = redact
                .iter()
                .any(|r| r.eq_ignore_ascii_case(name.as_str()));
            let rendered = if redacted {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[binary]").to_string()
            };
            (name.to_string(), rendered)
        })
        .collect()
}
