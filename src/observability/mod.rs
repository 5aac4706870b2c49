//! Observability subsystem: structured logging and metrics.
//!
//! Both are process-scoped dependencies initialized once at startup;
//! request-path code only calls the helper functions here.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redacted_headers};
