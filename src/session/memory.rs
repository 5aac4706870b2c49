//! In-process session store for tests and single-node deployments.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SessionRecord, SessionStore, StoreError};

struct Entry {
    record: SessionRecord,
    expires: Instant,
}

/// Session store backed by process memory.
///
/// Expired entries are dropped lazily on read; there is no sweeper task
/// because the entry count is bounded by active sessions.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Entry>,
    revoked: DashMap<String, ()>,
    user_sessions: DashMap<String, HashSet<String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let expired = match self.sessions.get(session_id) {
            Some(entry) => {
                if entry.expires > Instant::now() {
                    return Ok(Some(entry.record.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            self.sessions.remove(session_id);
        }
        Ok(None)
    }

    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        self.user_sessions
            .entry(record.user_id.clone())
            .or_default()
            .insert(record.session_id.clone());
        self.sessions.insert(
            record.session_id.clone(),
            Entry {
                record: record.clone(),
                expires: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn revoke(&self, session_id: &str) -> Result<(), StoreError> {
        self.revoked.insert(session_id.to_string(), ());
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.record.revoked = true;
        }
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.revoked.contains_key(session_id))
    }

    async fn touch(&self, session_id: &str, last_access: u64) -> Result<(), StoreError> {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.record.last_access_at = last_access;
        }
        Ok(())
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .user_sessions
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
