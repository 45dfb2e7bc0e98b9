//! Delayed attempt scheduling.
//!
//! Attempts are stored in a Redis sorted set scored by their due time in
//! epoch milliseconds. Claiming reads the due members with `ZRANGEBYSCORE`
//! and then removes each one with `ZREM`; only the worker whose `ZREM`
//! actually removed the member runs that attempt.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use comfyrelay_core::error::CoreError;
use comfyrelay_core::generation::{AttemptRequest, MediaKind};
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Sorted set holding scheduled attempts.
pub const ATTEMPTS_KEY: &str = "orchestrator:attempts";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Attempt encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Enqueues future attempts.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Enqueue exactly one attempt to run no earlier than `delay` from now.
    async fn schedule(&self, request: &AttemptRequest, delay: Duration) -> Result<(), DispatchError>;
}

/// A dispatcher workers can also pull due attempts from.
#[async_trait]
pub trait AttemptQueue: Dispatcher {
    /// Remove and return up to `limit` attempts whose due time has passed.
    async fn claim_due(&self, limit: usize) -> Result<Vec<AttemptRequest>, DispatchError>;
}

/// Dispatch attempt 1 of a freshly submitted job under a new owner identity.
pub async fn enqueue_job(
    dispatcher: &dyn Dispatcher,
    job_id: &str,
    kind: MediaKind,
) -> Result<AttemptRequest, DispatchError> {
    let request = AttemptRequest::first(job_id, kind, Uuid::new_v4().to_string());
    request.validate()?;
    dispatcher.schedule(&request, Duration::ZERO).await?;
    tracing::info!(
        job_id,
        kind = %kind,
        owner = %request.owner,
        "Job enqueued for completion",
    );
    Ok(request)
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct RedisAttemptQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisAttemptQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_key(conn, ATTEMPTS_KEY)
    }

    /// Use a different sorted set, e.g. to isolate environments sharing
    /// one Redis database.
    pub fn with_key(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }
}

#[async_trait]
impl Dispatcher for RedisAttemptQueue {
    async fn schedule(&self, request: &AttemptRequest, delay: Duration) -> Result<(), DispatchError> {
        let member = serde_json::to_string(request)?;
        let due = epoch_millis().saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg(due)
            .arg(&member)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            job_id = %request.job_id,
            attempt = request.attempt,
            delay_ms = delay.as_millis() as u64,
            "Attempt scheduled",
        );
        Ok(())
    }
}

#[async_trait]
impl AttemptQueue for RedisAttemptQueue {
    async fn claim_due(&self, limit: usize) -> Result<Vec<AttemptRequest>, DispatchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg("-inf")
            .arg(epoch_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(due.len());
        for member in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.key)
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if removed == 0 {
                // Another worker claimed it first.
                continue;
            }
            match serde_json::from_str::<AttemptRequest>(&member) {
                Ok(request) => claimed.push(request),
                Err(e) => {
                    tracing::error!(member = %member, error = %e, "Dropping undecodable attempt");
                }
            }
        }
        Ok(claimed)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// One call to [`Dispatcher::schedule`], as recorded by [`MemoryAttemptQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAttempt {
    pub request: AttemptRequest,
    pub delay: Duration,
}

#[derive(Debug, Default)]
struct MemoryQueueState {
    pending: Vec<(Instant, AttemptRequest)>,
    history: Vec<ScheduledAttempt>,
}

/// Attempt queue held in process memory. Keeps a log of every schedule
/// call for inspection.
#[derive(Debug, Default)]
pub struct MemoryAttemptQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryAttemptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt ever scheduled, oldest first.
    pub async fn scheduled(&self) -> Vec<ScheduledAttempt> {
        self.state.lock().await.history.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Claim every pending attempt regardless of its due time.
    pub async fn drain(&self) -> Vec<AttemptRequest> {
        let mut state = self.state.lock().await;
        let mut pending = std::mem::take(&mut state.pending);
        pending.sort_by_key(|(due, _)| *due);
        pending.into_iter().map(|(_, request)| request).collect()
    }
}

#[async_trait]
impl Dispatcher for MemoryAttemptQueue {
    async fn schedule(&self, request: &AttemptRequest, delay: Duration) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        state.pending.push((Instant::now() + delay, request.clone()));
        state.history.push(ScheduledAttempt {
            request: request.clone(),
            delay,
        });
        Ok(())
    }
}

#[async_trait]
impl AttemptQueue for MemoryAttemptQueue {
    async fn claim_due(&self, limit: usize) -> Result<Vec<AttemptRequest>, DispatchError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.pending.sort_by_key(|(due, _)| *due);

        let ready = state
            .pending
            .iter()
            .take_while(|(due, _)| *due <= now)
            .count()
            .min(limit);
        Ok(state
            .pending
            .drain(..ready)
            .map(|(_, request)| request)
            .collect())
    }
}
