//! Upstream proxying subsystem.
//!
//! # Data Flow
//! ```text
//! Matched request
//!     → headers.rs (validate, strip hop-by-hop, set forwarding headers)
//!     → client.rs (build URI, pooled forward, deadlines, retries)
//!     → Response streamed back (security headers appended if absent)
//! ```

pub mod client;
pub mod headers;

pub use client::{build_upstream_uri, upstream_authority, UpstreamClient};
pub use headers::{append_security_headers, prepare_upstream_headers, validate_headers};
