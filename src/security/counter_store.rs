//! Atomic counter stores backing the rate limiter.
//!
//! # Design Decisions
//! - One call increments and returns the new count; there is no separate read
//! - Expiry is set only when the key is created, so traffic never extends a window
//! - Redis runs both steps in one Lua script (one round trip, atomic on the server)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::time::Instant;

/// Counter store failure. The limiter treats every variant as "unavailable".
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Narrow interface over a shared atomic counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new value. When this creates the
    /// key, it expires after `ttl`.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

struct Entry {
    count: u64,
    expires_at: Instant,
}

/// Process-local store; correct for a single gateway instance and for tests.
#[derive(Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, Entry>,
    ops: AtomicU64,
}

/// Expired entries are swept every this many increments.
const SWEEP_EVERY: u64 = 4096;

/// Far enough out that the entry outlives any real window.
const FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FOREVER))
        .unwrap_or(now)
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let count = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                count: 0,
                expires_at: expiry(now, ttl),
            });
            if entry.expires_at <= now {
                // Expired key: behaves as a fresh one.
                entry.count = 0;
                entry.expires_at = expiry(now, ttl);
            }
            entry.count += 1;
            entry.count
        };

        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
        Ok(count)
    }
}

const INCR_WITH_EXPIRY: &str = r"
local n = redis.call('INCR', KEYS[1])
if n == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return n
";

/// Redis-backed store shared by every gateway instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: redis::Script,
}

impl RedisCounterStore {
    /// Connect to Redis; the manager reconnects on its own after outages.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            script: redis::Script::new(INCR_WITH_EXPIRY),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let count: u64 = self
            .script
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}
