//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Request (route, principal, client IP)
//!     → key.rs (expand rule template)
//!     → limiter.rs (select algorithm, evaluate)
//!     → store.rs (atomic per-key state mutation)
//!     → Decision: allow/deny + header values
//! ```
//!
//! # Design Decisions
//! - Store mutations are atomic per key; no read-then-write races
//! - Window algorithms increment before judging, so concurrent checks
//!   cannot admit more than the limit
//! - Store failure follows the rule's fail-open/fail-closed policy

pub mod key;
pub mod limiter;
pub mod store;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use store::{InMemoryRateLimitStore, RateLimitStore, RateLimitStoreError, RedisRateLimitStore};
