//! The completion state machine.
//!
//! One call to [`CompletionOrchestrator::run_attempt`] is one attempt:
//!
//! ```text
//! CHECK_DONE -> ACQUIRE_LOCK -> FETCH_STATUS -> EXTRACT -> PERSIST -> MARK_DONE
//!                                    |             |          |           |
//!                                    +-------------+----------+-----------+--> retry path
//!                                                                               |
//!                                                                   TERMINAL_FAIL (ceiling)
//! ```
//!
//! Attempts never sleep. Anything short of success or exhaustion comes back
//! as [`AttemptOutcome::Reschedule`] and the caller dispatches the next
//! attempt after the given delay. The execution lock is left in place on
//! that path so the same owner re-enters it next time.

use std::sync::Arc;
use std::time::Duration;

use comfyrelay_core::asset::{derive_metadata, file_name_of, AssetMetadata, DownloadedAsset};
use comfyrelay_core::error::CoreError;
use comfyrelay_core::generation::{
    AttemptRequest, CompletionState, MediaKind, TaskStatus, GENERATION_TIMEOUT,
};
use comfyrelay_core::lock_store::{completion_key, lock_key, LockStore, LockStoreError};
use comfyrelay_core::persistence::ResultPersister;
use comfyrelay_core::render_backend::RenderBackend;
use comfyrelay_core::retry::RetryPolicy;
use serde::{Serialize, Serializer};

/// Default execution lock ttl.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// Default completion record ttl.
pub const DEFAULT_COMPLETION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an attempt asked to be rescheduled, or why the job finally failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RetryReason {
    #[error("outputs not ready")]
    NotReady,

    #[error("outputs reported but no assets of the job kind")]
    NoAssets,

    #[error("render backend error: {0}")]
    Backend(String),

    #[error("asset download failed: {0}")]
    Download(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("lock store error: {0}")]
    Store(String),
}

impl From<LockStoreError> for RetryReason {
    fn from(err: LockStoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result of one attempt, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The completion record already said `completed`; nothing was touched.
    AlreadyCompleted { job_id: String },

    /// Another live owner holds the execution lock. Not rescheduled.
    AlreadyProcessing { job_id: String, owner: String },

    /// Results persisted and the job marked done.
    Completed {
        job_id: String,
        kind: MediaKind,
        /// Persisted URL of every asset, in download order.
        files: Vec<String>,
    },

    /// Dispatch attempt `next_attempt` after `delay`.
    Reschedule {
        job_id: String,
        #[serde(rename = "delay_secs", serialize_with = "serialize_secs")]
        delay: Duration,
        next_attempt: u32,
        reason: RetryReason,
    },

    /// Attempt ceiling reached. No further attempts may be dispatched.
    Failed {
        job_id: String,
        error: String,
        last_reason: RetryReason,
    },
}

fn serialize_secs<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(delay.as_secs_f64())
}

impl AttemptOutcome {
    /// `(delay, next_attempt)` when the attempt asked to be rescheduled.
    pub fn reschedule(&self) -> Option<(Duration, u32)> {
        match self {
            Self::Reschedule {
                delay,
                next_attempt,
                ..
            } => Some((*delay, *next_attempt)),
            _ => None,
        }
    }

    /// Whether this job will never be attempted again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCompleted { .. } | Self::Completed { .. } | Self::Failed { .. }
        )
    }
}

/// Errors surfaced to the caller instead of an outcome. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid attempt request: {0}")]
    Validation(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Store ttls and URL settings for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub lock_ttl: Duration,
    pub completion_ttl: Duration,
    pub public_base_url: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            completion_ttl: DEFAULT_COMPLETION_TTL,
            public_base_url: None,
        }
    }
}

enum LockAcquisition {
    Acquired,
    /// The lock already carries this attempt's owner identity.
    Resumed,
    HeldBy(String),
}

/// Drives jobs to a terminal state, one attempt at a time.
///
/// Holds no per-job state; any number of attempts for different jobs may
/// run through one instance concurrently.
pub struct CompletionOrchestrator {
    store: Arc<dyn LockStore>,
    backend: Arc<dyn RenderBackend>,
    persister: Arc<dyn ResultPersister>,
    policy: RetryPolicy,
    settings: OrchestratorSettings,
}

impl CompletionOrchestrator {
    pub fn new(
        store: Arc<dyn LockStore>,
        backend: Arc<dyn RenderBackend>,
        persister: Arc<dyn ResultPersister>,
        policy: RetryPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            backend,
            persister,
            policy,
            settings,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one attempt for `request`.
    ///
    /// Only a malformed request is an `Err`; every runtime failure is
    /// folded into the returned outcome.
    pub async fn run_attempt(
        &self,
        request: &AttemptRequest,
    ) -> Result<AttemptOutcome, OrchestratorError> {
        request.validate()?;
        let job_id = request.job_id.as_str();

        match self.store.get(&completion_key(job_id)).await {
            Ok(Some(value))
                if CompletionState::from_store_value(&value) == Some(CompletionState::Completed) =>
            {
                tracing::info!(job_id, attempt = request.attempt, "Job already completed");
                return Ok(AttemptOutcome::AlreadyCompleted {
                    job_id: job_id.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) => return Ok(self.retry_or_fail(request, e.into(), false).await),
        }

        match self.acquire_lock(request).await {
            Ok(LockAcquisition::Acquired) => {}
            Ok(LockAcquisition::Resumed) => {
                tracing::debug!(job_id, owner = %request.owner, "Resuming own execution lock");
            }
            Ok(LockAcquisition::HeldBy(owner)) => {
                tracing::info!(
                    job_id,
                    owner = %owner,
                    attempt_owner = %request.owner,
                    "Job already processing under another owner",
                );
                return Ok(AttemptOutcome::AlreadyProcessing {
                    job_id: job_id.to_string(),
                    owner,
                });
            }
            Err(e) => return Ok(self.retry_or_fail(request, e.into(), false).await),
        }

        tracing::info!(
            job_id,
            kind = %request.kind,
            attempt = request.attempt,
            owner = %request.owner,
            "Completion attempt started",
        );

        let files = match self.persist_results(request).await {
            Ok(files) => files,
            Err(reason) => return Ok(self.retry_or_fail(request, reason, true).await),
        };

        if let Err(e) = self
            .store
            .set(
                &completion_key(job_id),
                CompletionState::Completed.as_str(),
                self.settings.completion_ttl,
            )
            .await
        {
            // Durable status is already `completed`; only a non-final
            // attempt may take the retry path from here.
            if !self.policy.decide(request.kind, request.attempt).exhausted {
                return Ok(self.retry_or_fail(request, e.into(), true).await);
            }
            tracing::error!(
                job_id,
                attempt = request.attempt,
                error = %e,
                "Completion record not written on final attempt; durable status stays completed",
            );
        }

        if let Err(e) = self.store.delete(&lock_key(job_id)).await {
            tracing::warn!(job_id, error = %e, "Failed to release execution lock");
        }
        tracing::info!(job_id, files = files.len(), "Job completed");
        Ok(AttemptOutcome::Completed {
            job_id: job_id.to_string(),
            kind: request.kind,
            files,
        })
    }

    /// Take the execution lock, or recognise it as ours and extend its ttl.
    ///
    /// If the lock vanishes between the failed set and the owner read (ttl
    /// expiry), the set is retried once before giving up.
    async fn acquire_lock(
        &self,
        request: &AttemptRequest,
    ) -> Result<LockAcquisition, LockStoreError> {
        let key = lock_key(&request.job_id);

        for _ in 0..2 {
            if self
                .store
                .set_if_absent(&key, &request.owner, self.settings.lock_ttl)
                .await?
            {
                return Ok(LockAcquisition::Acquired);
            }
            match self.store.get(&key).await? {
                Some(owner) if owner == request.owner => {
                    if self
                        .store
                        .refresh_if_owner(&key, &request.owner, self.settings.lock_ttl)
                        .await?
                    {
                        return Ok(LockAcquisition::Resumed);
                    }
                }
                Some(owner) => return Ok(LockAcquisition::HeldBy(owner)),
                None => {}
            }
        }

        Err(LockStoreError::Command(format!(
            "execution lock {key} changed hands during acquisition"
        )))
    }

    /// FETCH_STATUS through PERSIST. Returns the persisted file URLs.
    async fn persist_results(&self, request: &AttemptRequest) -> Result<Vec<String>, RetryReason> {
        let job_id = request.job_id.as_str();

        let outputs = self
            .backend
            .fetch_status(job_id)
            .await
            .map_err(|e| RetryReason::Backend(e.to_string()))?;
        if outputs.is_empty() {
            return Err(RetryReason::NotReady);
        }

        let mut downloaded = Vec::new();
        for (slot, descriptor) in outputs.assets_for(request.kind) {
            let path = self
                .backend
                .download_asset(descriptor)
                .await
                .map_err(|e| RetryReason::Download(e.to_string()))?;
            tracing::debug!(
                job_id,
                slot,
                file = %file_name_of(&path),
                "Asset downloaded",
            );
            downloaded.push(DownloadedAsset {
                path,
                descriptor: descriptor.clone(),
            });
        }
        if downloaded.is_empty() {
            return Err(RetryReason::NoAssets);
        }

        let mut batch: Vec<AssetMetadata> = Vec::with_capacity(downloaded.len());
        for asset in &downloaded {
            batch.push(
                derive_metadata(asset, request.kind, self.settings.public_base_url.as_deref())
                    .await,
            );
        }

        self.persister
            .append_asset_records(job_id, &batch)
            .await
            .map_err(|e| RetryReason::Persistence(e.to_string()))?;
        self.persister
            .set_job_status(job_id, TaskStatus::Completed)
            .await
            .map_err(|e| RetryReason::Persistence(e.to_string()))?;

        Ok(batch.into_iter().map(|m| m.url).collect())
    }

    /// The retry path: reschedule, or fail the job once the ceiling is hit.
    async fn retry_or_fail(
        &self,
        request: &AttemptRequest,
        reason: RetryReason,
        holds_lock: bool,
    ) -> AttemptOutcome {
        let decision = self.policy.decide(request.kind, request.attempt);
        if decision.exhausted {
            return self.terminal_fail(request, reason, holds_lock).await;
        }

        let delay = self.policy.jittered_delay(decision.delay);
        let next_attempt = request.attempt + 1;
        match reason {
            RetryReason::NotReady => tracing::info!(
                job_id = %request.job_id,
                attempt = request.attempt,
                next_attempt,
                delay_secs = delay.as_secs(),
                "Outputs not ready, rescheduling",
            ),
            _ => tracing::warn!(
                job_id = %request.job_id,
                attempt = request.attempt,
                next_attempt,
                delay_secs = delay.as_secs(),
                reason = %reason,
                "Attempt failed, rescheduling",
            ),
        }

        AttemptOutcome::Reschedule {
            job_id: request.job_id.clone(),
            delay,
            next_attempt,
            reason,
        }
    }

    /// TERMINAL_FAIL. Each write is best effort; a failure is logged and
    /// the remaining writes still run.
    async fn terminal_fail(
        &self,
        request: &AttemptRequest,
        reason: RetryReason,
        holds_lock: bool,
    ) -> AttemptOutcome {
        let job_id = request.job_id.as_str();
        tracing::error!(
            job_id,
            attempt = request.attempt,
            max_attempts = self.policy.max_attempts,
            last_reason = %reason,
            "Attempt ceiling reached, failing job",
        );

        if let Err(e) = self
            .store
            .set(
                &completion_key(job_id),
                CompletionState::Failed.as_str(),
                self.settings.completion_ttl,
            )
            .await
        {
            tracing::error!(job_id, error = %e, "Failed to write failed completion record");
        }

        if holds_lock {
            if let Err(e) = self.store.delete(&lock_key(job_id)).await {
                tracing::warn!(job_id, error = %e, "Failed to release execution lock");
            }
        }

        if let Err(e) = self
            .persister
            .set_job_status(job_id, TaskStatus::Failed)
            .await
        {
            tracing::error!(job_id, error = %e, "Failed to mark task failed");
        }

        AttemptOutcome::Failed {
            job_id: job_id.to_string(),
            error: GENERATION_TIMEOUT.to_string(),
            last_reason: reason,
        }
    }
}
