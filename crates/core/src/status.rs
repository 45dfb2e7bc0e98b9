//! Externally visible job state.
//!
//! Clients see three states. The completion record in the lock store
//! is authoritative while it lives; after its ttl lapses the durable
//! task status takes over.

use serde::Serialize;

use crate::generation::{CompletionState, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalJobState {
    Processing,
    Completed,
    Failed,
}

impl ExternalJobState {
    pub fn derive(completion: Option<CompletionState>, durable: Option<TaskStatus>) -> Self {
        match (completion, durable) {
            (Some(CompletionState::Completed), _) => Self::Completed,
            (Some(CompletionState::Failed), _) => Self::Failed,
            (None, Some(TaskStatus::Completed)) => Self::Completed,
            (None, Some(TaskStatus::Failed)) => Self::Failed,
            (None, Some(TaskStatus::Pending) | None) => Self::Processing,
        }
    }
}
