//! Generation job identity, status values, and the per-attempt request.
//!
//! A job has no storage of its own: every orchestration attempt rebuilds
//! it from the [`AttemptRequest`] the dispatcher hands over.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Status constants
// ---------------------------------------------------------------------------

/// Durable status set by the submitting API before the first attempt.
pub const STATUS_PENDING: &str = "pending";
/// Durable / completion-record status once results are persisted.
pub const STATUS_COMPLETED: &str = "completed";
/// Durable / completion-record status once the attempt budget is spent.
pub const STATUS_FAILED: &str = "failed";

/// Error message attached to jobs that exhaust their attempt budget.
pub const GENERATION_TIMEOUT: &str = "Generation timeout";

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Kind of render job, which is also the kind of asset it produces.
///
/// Drives the backoff interval and which output sub-list is downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(CoreError::UnknownVariant {
                kind: "media kind",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Durable status of a generation task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => STATUS_PENDING,
            Self::Completed => STATUS_COMPLETED,
            Self::Failed => STATUS_FAILED,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            STATUS_PENDING => Ok(Self::Pending),
            STATUS_COMPLETED => Ok(Self::Completed),
            STATUS_FAILED => Ok(Self::Failed),
            other => Err(CoreError::UnknownVariant {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionState
// ---------------------------------------------------------------------------

/// Terminal marker stored in the lock store under `done:{job_id}`.
///
/// Absence of the key means the job has not finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionState {
    Completed,
    Failed,
}

impl CompletionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => STATUS_COMPLETED,
            Self::Failed => STATUS_FAILED,
        }
    }

    /// Parse a raw store value. Anything unrecognised (including legacy
    /// markers such as `processing`) is treated as "not finished".
    pub fn from_store_value(value: &str) -> Option<Self> {
        match value {
            STATUS_COMPLETED => Some(Self::Completed),
            STATUS_FAILED => Some(Self::Failed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptRequest
// ---------------------------------------------------------------------------

/// Dispatch parameters for one orchestration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRequest {
    /// Backend-assigned job identifier (ComfyUI `prompt_id`).
    pub job_id: String,
    pub kind: MediaKind,
    /// Identity of the logical run; preserved across reschedules so the
    /// same run can re-enter its own execution lock.
    pub owner: String,
    /// 1-based attempt number, monotonic per job.
    pub attempt: u32,
}

impl AttemptRequest {
    /// First attempt of a freshly submitted job.
    pub fn first(job_id: impl Into<String>, kind: MediaKind, owner: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            owner: owner.into(),
            attempt: 1,
        }
    }

    /// The follow-up attempt for the same logical run.
    pub fn next(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Reject requests that can never succeed.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_id.trim().is_empty() {
            return Err(CoreError::Validation("job_id is required".to_string()));
        }
        if self.owner.trim().is_empty() {
            return Err(CoreError::Validation("owner identity is required".to_string()));
        }
        if self.attempt == 0 {
            return Err(CoreError::Validation(
                "attempt numbering starts at 1".to_string(),
            ));
        }
        Ok(())
    }
}
