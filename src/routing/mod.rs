//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → pattern.rs (normalize path)
//!     → router.rs (scan pre-sorted route table)
//!     → Return: RouteMatch, NotFound, MethodNotAllowed or BadRequest
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Compile patterns (segment matchers)
//!     → Reject ambiguous tables
//!     → Sort by priority, then specificity
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in the hot path (segment matching only)
//! - First match wins over the sorted table

pub mod pattern;
pub mod router;

pub use pattern::{normalize_path, CompiledPattern};
pub use router::{Route, RouteMatch, Router, RouterBuildError};
