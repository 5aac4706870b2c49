//! Session storage subsystem.
//!
//! The gateway never mints sessions; an external identity provider
//! creates them and the gateway validates, touches, refreshes and
//! revokes them through the narrow [`SessionStore`] interface.
//!
//! # Design Decisions
//! - The store owns session state; the gateway holds short-lived snapshots
//! - Expiry is enforced both by store TTL and by a defensive check on read
//! - Revocation is a separate marker so it stays visible for signed tokens

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemorySessionStore;
pub use redis::RedisSessionStore;

/// Current Unix time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Server-side authoritative state for an opaque session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// Session identifier (primary key; equals the opaque token).
    pub session_id: String,

    /// Owning user.
    pub user_id: String,

    /// Creation time, epoch seconds.
    pub created_at: u64,

    /// Last validated access, epoch seconds.
    pub last_access_at: u64,

    /// Expiry, epoch seconds.
    pub expires_at: u64,

    /// Revocation flag; the revocation marker is authoritative.
    #[serde(default)]
    pub revoked: bool,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    /// Client IP the session is bound to, when IP binding is in force.
    #[serde(default)]
    pub bound_ip: Option<String>,

    /// Set when the user's sessions were rotated after a privilege
    /// change; sessions created before this instant are refused.
    #[serde(default)]
    pub rotated_at: Option<u64>,

    /// Opaque metadata carried for upstream services.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionRecord {
    /// Whether the record is past its expiry.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in seconds.
    pub fn remaining_ttl(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// Error from a session store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Narrow interface the gateway requires of a session backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session snapshot, or None when absent or expired.
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Store a session with the given TTL. Idempotent.
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Mark a session revoked. Atomic: once this returns, every
    /// subsequent `is_revoked` observes the marker.
    async fn revoke(&self, session_id: &str) -> Result<(), StoreError>;

    /// Check the revocation marker.
    async fn is_revoked(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Best-effort update of `last_access_at`.
    async fn touch(&self, session_id: &str, last_access: u64) -> Result<(), StoreError>;

    /// Session ids belonging to a user, for bulk revocation.
    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Liveness probe used by the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
