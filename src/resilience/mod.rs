//! Retry and backoff policies for upstream forwarding.

pub mod backoff;
pub mod retries;

pub use backoff::backoff_delay;
pub use retries::{is_idempotent, FailurePhase};
