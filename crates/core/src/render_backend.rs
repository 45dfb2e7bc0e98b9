//! Contract for the external rendering engine.
//!
//! The orchestrator only needs two calls: fetch the outputs reported for
//! a job, and download one reported asset to local storage.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generation::MediaKind;

/// One downloadable file reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Backend folder type (ComfyUI: `output`, `temp`, `input`).
    pub folder_type: String,
    /// Which output sub-list the descriptor came from.
    pub media: MediaKind,
    /// Encoded format as reported by the backend (e.g. `video/h264-mp4`).
    pub format: Option<String>,
    pub frame_rate: Option<f64>,
    pub duration_seconds: Option<f64>,
}

/// Image- and video-typed outputs of a single output slot (node).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotOutputs {
    pub images: Vec<AssetDescriptor>,
    pub videos: Vec<AssetDescriptor>,
}

impl SlotOutputs {
    /// The sub-list matching the job kind.
    pub fn for_kind(&self, kind: MediaKind) -> &[AssetDescriptor] {
        match kind {
            MediaKind::Image => &self.images,
            MediaKind::Video => &self.videos,
        }
    }
}

/// All outputs reported for a job, keyed by output slot identifier.
///
/// No slots at all means the job is still rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub slots: BTreeMap<String, SlotOutputs>,
}

impl JobOutputs {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every descriptor of the given kind, across all slots, in slot order.
    pub fn assets_for(&self, kind: MediaKind) -> impl Iterator<Item = (&str, &AssetDescriptor)> {
        self.slots.iter().flat_map(move |(slot, outputs)| {
            outputs
                .for_kind(kind)
                .iter()
                .map(move |desc| (slot.as_str(), desc))
        })
    }
}

/// Errors surfaced by a render backend. All are retryable from the
/// orchestrator's point of view.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend returned an error: {0}")]
    Api(String),

    #[error("Asset download failed for '{filename}': {reason}")]
    Download { filename: String, reason: String },
}

/// Status and download calls against the rendering engine.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Fetch the outputs currently reported for `job_id`.
    async fn fetch_status(&self, job_id: &str) -> Result<JobOutputs, BackendError>;

    /// Download one asset and return the local path it was written to.
    async fn download_asset(&self, descriptor: &AssetDescriptor) -> Result<PathBuf, BackendError>;
}
