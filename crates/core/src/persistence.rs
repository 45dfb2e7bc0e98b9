//! Contract for durable storage of results.
//!
//! The orchestrator never builds storage queries itself; it hands a
//! metadata batch and status changes to a [`ResultPersister`].

use async_trait::async_trait;

use crate::asset::AssetMetadata;
use crate::generation::TaskStatus;

/// Errors from the persistence layer. Always retryable.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Generation task {0} not found")]
    TaskNotFound(String),
}

/// Durable writes performed when a job reaches a terminal state.
#[async_trait]
pub trait ResultPersister: Send + Sync {
    /// Insert one metadata row per asset, associated with `job_id`, as a
    /// single batch.
    async fn append_asset_records(
        &self,
        job_id: &str,
        batch: &[AssetMetadata],
    ) -> Result<(), PersistError>;

    async fn set_job_status(&self, job_id: &str, status: TaskStatus) -> Result<(), PersistError>;
}
