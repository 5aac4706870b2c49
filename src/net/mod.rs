//! Network-facing plumbing: TLS termination for the listener.

pub mod tls;
