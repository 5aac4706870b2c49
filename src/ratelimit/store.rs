//! Rate limit state stores.
//!
//! Every mutation is atomic per key: the in-process store mutates under
//! the owning shard lock, the Redis store runs a server-side script
//! (token bucket) or a MULTI/EXEC pipeline (window counters). The
//! limiter never performs a separate read-then-write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Error from a rate limit store backend.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitStoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an atomic token bucket consume.
#[derive(Debug, Clone, Copy)]
pub struct BucketDecision {
    pub allowed: bool,
    /// Whole tokens left after the consume.
    pub remaining: u64,
    /// Seconds until the next full token is available.
    pub reset_secs: u64,
}

/// Current Unix time as fractional seconds.
pub fn now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Narrow interface the limiter requires of a rate limit backend.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Refill and consume one token from the bucket at `key`. Atomic.
    async fn token_bucket_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> Result<BucketDecision, RateLimitStoreError>;

    /// Increment the counter for the window containing `now`. Atomic.
    /// Returns the post-increment count and seconds to window end.
    async fn window_increment(
        &self,
        key: &str,
        window_secs: u64,
        now: f64,
    ) -> Result<(u64, u64), RateLimitStoreError>;

    /// Read a window counter without incrementing (sliding window
    /// estimation reads the previous window through this).
    async fn window_count(
        &self,
        key: &str,
        window_start: u64,
    ) -> Result<u64, RateLimitStoreError>;

    /// Liveness probe used by the readiness endpoint.
    async fn ping(&self) -> Result<(), RateLimitStoreError>;
}

struct Bucket {
    tokens: f64,
    last_refill: f64,
}

/// In-process rate limit store.
///
/// Keys mutate under their DashMap shard lock, which serializes
/// concurrent consumers of the same key. Idle entries are swept
/// opportunistically so abandoned keys do not accumulate.
pub struct InMemoryRateLimitStore {
    buckets: DashMap<String, Bucket>,
    windows: DashMap<String, (u64, u64)>, // key -> (count, window_end_secs)
    ops: AtomicU64,
}

const SWEEP_EVERY_OPS: u64 = 4096;

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            windows: DashMap::new(),
            ops: AtomicU64::new(0),
        }
    }

    fn maybe_sweep(&self, now: f64) {
        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_OPS != 0 {
            return;
        }
        self.windows
            .retain(|_, entry| (entry.1 as f64) + 60.0 > now);
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn token_bucket_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> Result<BucketDecision, RateLimitStoreError> {
        self.maybe_sweep(now);

        let mut entry = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = (now - entry.last_refill).max(0.0);
        entry.tokens = (entry.tokens + elapsed * refill_rate).min(capacity);
        entry.last_refill = now;

        let allowed = if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        };

        Ok(decide(allowed, entry.tokens, refill_rate))
    }

    async fn window_increment(
        &self,
        key: &str,
        window_secs: u64,
        now: f64,
    ) -> Result<(u64, u64), RateLimitStoreError> {
        self.maybe_sweep(now);

        let window_start = (now as u64) / window_secs * window_secs;
        let window_end = window_start + window_secs;
        let map_key = format!("{}:{}", key, window_start);

        let mut entry = self.windows.entry(map_key).or_insert((0, window_end));
        entry.0 += 1;

        Ok((entry.0, window_end.saturating_sub(now as u64).max(1)))
    }

    async fn window_count(
        &self,
        key: &str,
        window_start: u64,
    ) -> Result<u64, RateLimitStoreError> {
        let map_key = format!("{}:{}", key, window_start);
        Ok(self.windows.get(&map_key).map(|e| e.0).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), RateLimitStoreError> {
        Ok(())
    }
}

fn decide(allowed: bool, tokens: f64, refill_rate: f64) -> BucketDecision {
    let reset_secs = if tokens >= 1.0 || refill_rate <= 0.0 {
        if refill_rate <= 0.0 && tokens < 1.0 {
            // Never refills; report a minimal wait instead of infinity.
            1
        } else {
            0
        }
    } else {
        ((1.0 - tokens) / refill_rate).ceil() as u64
    };
    BucketDecision {
        allowed,
        remaining: tokens.floor().max(0.0) as u64,
        reset_secs: reset_secs.max(if allowed { 0 } else { 1 }),
    }
}

const KEY_PREFIX: &str = "ratelimit:";

/// Redis-backed rate limit store for multi-instance deployments.
pub struct RedisRateLimitStore {
    connection: ConnectionManager,
    bucket_script: redis::Script,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> Result<Self, RateLimitStoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;

        // KEYS[1] = bucket key; ARGV = capacity, refill_rate, now, ttl.
        // Refill and consume happen server-side in one step.
        let bucket_script = redis::Script::new(
            r#"
            local data = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
            local capacity = tonumber(ARGV[1])
            local refill = tonumber(ARGV[2])
            local now = tonumber(ARGV[3])
            local tokens = tonumber(data[1])
            local last = tonumber(data[2])
            if tokens == nil then
                tokens = capacity
                last = now
            end
            local elapsed = now - last
            if elapsed < 0 then elapsed = 0 end
            tokens = math.min(capacity, tokens + elapsed * refill)
            local allowed = 0
            if tokens >= 1 then
                tokens = tokens - 1
                allowed = 1
            end
            redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill', tostring(now))
            redis.call('EXPIRE', KEYS[1], tonumber(ARGV[4]))
            return {allowed, tostring(tokens)}
            "#,
        );

        tracing::info!("Connected to Redis rate limit store");
        Ok(Self {
            connection,
            bucket_script,
        })
    }

    fn bucket_key(key: &str) -> String {
        format!("{}{}:bucket", KEY_PREFIX, key)
    }

    fn window_key(key: &str, window_start: u64) -> String {
        format!("{}{}:window:{}", KEY_PREFIX, key, window_start)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn token_bucket_consume(
        &self,
        key: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> Result<BucketDecision, RateLimitStoreError> {
        // TTL twice the drain-to-full time bounds idle bucket lifetime.
        let ttl = if refill_rate > 0.0 {
            ((capacity / refill_rate) * 2.0).ceil().max(60.0) as u64
        } else {
            3600
        };

        let mut conn = self.connection.clone();
        let (allowed, tokens): (u8, String) = self
            .bucket_script
            .key(Self::bucket_key(key))
            .arg(capacity)
            .arg(refill_rate)
            .arg(now)
            .arg(ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;

        let tokens: f64 = tokens.parse().unwrap_or(0.0);
        Ok(decide(allowed == 1, tokens, refill_rate))
    }

    async fn window_increment(
        &self,
        key: &str,
        window_secs: u64,
        now: f64,
    ) -> Result<(u64, u64), RateLimitStoreError> {
        let window_start = (now as u64) / window_secs * window_secs;
        let window_end = window_start + window_secs;
        let redis_key = Self::window_key(key, window_start);

        let mut conn = self.connection.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1u64)
            .expire(&redis_key, (window_secs * 2) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;

        Ok((count, window_end.saturating_sub(now as u64).max(1)))
    }

    async fn window_count(
        &self,
        key: &str,
        window_start: u64,
    ) -> Result<u64, RateLimitStoreError> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = conn
            .get(Self::window_key(key, window_start))
            .await
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;
        Ok(count.unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), RateLimitStoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
