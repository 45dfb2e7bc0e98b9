//! [`LockStore`] adapters: Redis for production, an in-process map for
//! tests and single-node development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use comfyrelay_core::lock_store::{LockStore, LockStoreError};
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

fn map_redis_error(err: redis::RedisError) -> LockStoreError {
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        LockStoreError::Connection(err.to_string())
    } else {
        LockStoreError::Command(err.to_string())
    }
}

/// `PEXPIRE` only while the key still carries the caller's value.
const REFRESH_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// Expiry in whole milliseconds, never zero (Redis rejects `PX 0`).
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// Lock store over a shared Redis connection.
///
/// [`ConnectionManager`] reconnects on its own; this adapter issues each
/// command exactly once and reports failures as-is.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
}

impl RedisLockStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn refresh_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = redis::Script::new(REFRESH_IF_OWNER)
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(refreshed == 1)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LockStoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LockStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Lock store held in process memory, with ttl enforced on read.
///
/// Uses the Tokio clock so tests can pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` as if its ttl had elapsed.
    pub async fn expire(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Current value of `key`, ignoring expired entries.
    pub async fn peek(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    /// Remaining ttl of `key`, if it is live.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(_, expires_at)| *expires_at - now)
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError> {
        Ok(self.peek(key).await)
    }

    async fn refresh_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some((current, expires_at)) if *expires_at > now && current.as_str() == value => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LockStoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), LockStoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
