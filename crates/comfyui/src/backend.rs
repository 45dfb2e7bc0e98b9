//! [`RenderBackend`] implementation backed by a ComfyUI instance.
//!
//! Status comes from `/history`, and assets are fetched through `/view`
//! and written under a local output directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use comfyrelay_core::render_backend::{AssetDescriptor, BackendError, JobOutputs, RenderBackend};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::parse_outputs;

/// Render backend that polls ComfyUI and stores downloads on local disk.
#[derive(Debug, Clone)]
pub struct ComfyUIBackend {
    api: ComfyUIApi,
    output_dir: PathBuf,
}

impl ComfyUIBackend {
    pub fn new(api: ComfyUIApi, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Local destination for a reported file.
    ///
    /// Only the final component of `filename` is kept so that a reported
    /// name can never escape the output directory. Plain components of
    /// `subfolder` become a `_`-joined prefix, which keeps same-named
    /// outputs from different subfolders apart.
    pub fn local_path_for(&self, subfolder: &str, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename).file_name()?.to_str()?;
        let prefix: Vec<&str> = Path::new(subfolder)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();

        if prefix.is_empty() {
            Some(self.output_dir.join(name))
        } else {
            Some(self.output_dir.join(format!("{}_{name}", prefix.join("_"))))
        }
    }
}

impl From<ComfyUIApiError> for BackendError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) => BackendError::Unreachable(e.to_string()),
            api @ ComfyUIApiError::ApiError { .. } => BackendError::Api(api.to_string()),
        }
    }
}

#[async_trait]
impl RenderBackend for ComfyUIBackend {
    async fn fetch_status(&self, job_id: &str) -> Result<JobOutputs, BackendError> {
        let history = self.api.get_history(job_id).await?;
        let outputs = parse_outputs(&history, job_id);
        tracing::debug!(
            job_id,
            slots = outputs.slots.len(),
            "Fetched ComfyUI history",
        );
        Ok(outputs)
    }

    async fn download_asset(&self, descriptor: &AssetDescriptor) -> Result<PathBuf, BackendError> {
        let download_err = |reason: String| BackendError::Download {
            filename: descriptor.filename.clone(),
            reason,
        };

        let local_path = self
            .local_path_for(&descriptor.subfolder, &descriptor.filename)
            .ok_or_else(|| download_err("filename has no usable final component".to_string()))?;

        let bytes = self
            .api
            .view(
                &descriptor.filename,
                &descriptor.subfolder,
                &descriptor.folder_type,
            )
            .await
            .map_err(|e| download_err(e.to_string()))?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| download_err(e.to_string()))?;
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|e| download_err(e.to_string()))?;

        tracing::info!(
            filename = %descriptor.filename,
            path = %local_path.display(),
            bytes = bytes.len(),
            "Downloaded ComfyUI asset",
        );

        Ok(local_path)
    }
}
