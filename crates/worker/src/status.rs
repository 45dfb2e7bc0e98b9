//! Job status as reported to API clients.

use comfyrelay_core::generation::{CompletionState, TaskStatus, GENERATION_TIMEOUT};
use comfyrelay_core::lock_store::{completion_key, LockStore, LockStoreError};
use comfyrelay_core::status::ExternalJobState;
use comfyrelay_db::models::generation::{GeneratedFile, GenerationTask};
use comfyrelay_db::repositories::{GeneratedFileRepo, GenerationTaskRepo};
use comfyrelay_db::DbPool;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StatusQueryError {
    #[error("Generation task {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] LockStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Status of a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: ExternalJobState,
    /// Persisted files; only populated once the job is completed.
    pub files: Vec<GeneratedFile>,
    /// Failure reason; only set once the job has failed.
    pub error: Option<String>,
}

/// Assemble a report from the two sources of truth.
///
/// Returns `None` when neither the completion record nor the task row
/// knows the job.
pub fn build_report(
    job_id: &str,
    completion: Option<CompletionState>,
    task: Option<&GenerationTask>,
    files: Vec<GeneratedFile>,
) -> Option<JobStatusReport> {
    if completion.is_none() && task.is_none() {
        return None;
    }

    let durable = task.and_then(|t| t.status.parse::<TaskStatus>().ok());
    let status = ExternalJobState::derive(completion, durable);

    Some(JobStatusReport {
        job_id: job_id.to_string(),
        status,
        files: match status {
            ExternalJobState::Completed => files,
            _ => Vec::new(),
        },
        error: (status == ExternalJobState::Failed).then(|| GENERATION_TIMEOUT.to_string()),
    })
}

/// Look up the externally visible state of `job_id`.
///
/// The completion record is read first; the task row decides once that
/// record has expired.
pub async fn query_job_status(
    store: &dyn LockStore,
    pool: &DbPool,
    job_id: &str,
) -> Result<JobStatusReport, StatusQueryError> {
    let completion = store
        .get(&completion_key(job_id))
        .await?
        .as_deref()
        .and_then(CompletionState::from_store_value);
    let task = GenerationTaskRepo::find_by_prompt_id(pool, job_id).await?;

    let preliminary = build_report(job_id, completion, task.as_ref(), Vec::new())
        .ok_or_else(|| StatusQueryError::NotFound(job_id.to_string()))?;

    let files = if preliminary.status == ExternalJobState::Completed {
        GeneratedFileRepo::list_by_prompt_id(pool, job_id).await?
    } else {
        Vec::new()
    };

    Ok(JobStatusReport {
        files,
        ..preliminary
    })
}
