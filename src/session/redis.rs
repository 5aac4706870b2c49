//! Redis-backed session store for multi-instance deployments.
//!
//! Key layout:
//! - `session:{id}` — JSON-serialized [`SessionRecord`], TTL-expired
//! - `session:revoked:{id}` — revocation marker, TTL matches the session
//! - `session:user:{user_id}` — set of session ids per user
//!
//! Revocation uses a server-side script so the marker TTL is derived
//! from the live session key in one atomic step.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{SessionRecord, SessionStore, StoreError};

const KEY_PREFIX: &str = "session:";

/// Session store talking to Redis through a reconnecting manager.
pub struct RedisSessionStore {
    connection: ConnectionManager,
    revoke_script: redis::Script,
}

impl RedisSessionStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // KEYS[1] = session key, KEYS[2] = marker key,
        // ARGV[1] = fallback TTL when the session key is already gone.
        let revoke_script = redis::Script::new(
            r#"
            local ttl = redis.call('TTL', KEYS[1])
            if ttl < 0 then ttl = tonumber(ARGV[1]) end
            redis.call('SET', KEYS[2], '1', 'EX', ttl)
            return 1
            "#,
        );

        tracing::info!("Connected to Redis session store");
        Ok(Self {
            connection,
            revoke_script,
        })
    }

    fn session_key(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }

    fn revocation_key(session_id: &str) -> String {
        format!("{}revoked:{}", KEY_PREFIX, session_id)
    }

    fn user_key(user_id: &str) -> String {
        format!("{}user:{}", KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn
            .get(Self::session_key(session_id))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                // TTL should have evicted this already; check defensively.
                if record.is_expired(super::now_secs()) {
                    return Ok(None);
                }
                Ok(Some(record))
            }
        }
    }

    async fn put(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(Self::session_key(&record.session_id), json, ttl_secs)
            .ignore()
            .sadd(Self::user_key(&record.user_id), &record.session_id)
            .ignore()
            .expire(Self::user_key(&record.user_id), ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn revoke(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = self
            .revoke_script
            .key(Self::session_key(session_id))
            .key(Self::revocation_key(session_id))
            .arg(3600u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn
            .exists(Self::revocation_key(session_id))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(exists)
    }

    async fn touch(&self, session_id: &str, last_access: u64) -> Result<(), StoreError> {
        // Best-effort read-modify-write; TTL is preserved.
        let mut conn = self.connection.clone();
        let key = Self::session_key(session_id);
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let Some(json) = raw else { return Ok(()) };

        let mut record: SessionRecord =
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        record.last_access_at = last_access;
        let json =
            serde_json::to_string(&record).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(json)
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        conn.smembers(Self::user_key(user_id))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
