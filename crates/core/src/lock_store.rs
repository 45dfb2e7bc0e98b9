//! Contract for the shared key-value store used for coordination.
//!
//! Two key spaces live in the store: the completion record
//! (`done:{job_id}`) and the execution lock (`lock:{job_id}`). Adapters
//! perform no retries of their own; every error reaches the orchestrator,
//! which treats it as a transient failure of the current attempt.

use std::time::Duration;

use async_trait::async_trait;

/// Key prefix for completion records.
pub const COMPLETION_KEY_PREFIX: &str = "done";

/// Key prefix for execution locks.
pub const LOCK_KEY_PREFIX: &str = "lock";

/// Key holding the terminal state of a job.
pub fn completion_key(job_id: &str) -> String {
    format!("{COMPLETION_KEY_PREFIX}:{job_id}")
}

/// Key holding the identity of the attempt that owns a job.
pub fn lock_key(job_id: &str) -> String {
    format!("{LOCK_KEY_PREFIX}:{job_id}")
}

/// Errors from the lock store layer.
#[derive(Debug, thiserror::Error)]
pub enum LockStoreError {
    #[error("Lock store connection error: {0}")]
    Connection(String),

    #[error("Lock store command error: {0}")]
    Command(String),
}

/// Atomic primitives over the shared key-value store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `value` with a ttl only if the key does not exist.
    /// Returns `true` when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError>;

    /// Reset the ttl of `key` only if it currently holds `value`.
    /// Returns `false` when the key is absent or holds something else.
    async fn refresh_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError>;

    /// Unconditionally set `key` with a ttl.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LockStoreError>;

    async fn delete(&self, key: &str) -> Result<(), LockStoreError>;
}
