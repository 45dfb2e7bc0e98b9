//! Metadata derivation for downloaded assets.
//!
//! Derivation never fails as a whole: each field that cannot be read
//! degrades to `None` and a warning is logged, so the asset record is
//! always persisted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::generation::MediaKind;
use crate::render_backend::AssetDescriptor;

/// A file the backend produced that now lives on local storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedAsset {
    pub path: PathBuf,
    pub descriptor: AssetDescriptor,
}

/// Metadata for one generated file, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Local path, or public URL when a base URL is configured.
    pub url: String,
    pub file_type: MediaKind,
    pub file_name: String,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub format: Option<String>,
}

/// Pixel dimensions and encoded format read from an image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Upper-case format name (`PNG`, `JPEG`, `WEBP`).
    pub format: String,
}

/// Failure to read an image header.
#[derive(Debug, thiserror::Error)]
pub enum ImageInspectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unrecognised image format")]
    UnknownFormat,
}

/// Read dimensions and format from the image header.
///
/// Only the header is decoded; pixel data is never loaded.
pub fn inspect_image(path: &Path) -> Result<ImageInfo, ImageInspectError> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .map(|f| format!("{f:?}").to_uppercase())
        .ok_or(ImageInspectError::UnknownFormat)?;
    let (width, height) = reader.into_dimensions()?;
    Ok(ImageInfo {
        width,
        height,
        format,
    })
}

/// Normalise a backend-reported video format.
///
/// ComfyUI video nodes report MIME-ish strings such as `video/h264-mp4`
/// or `image/gif`; the container suffix is kept.
pub fn normalize_video_format(reported: &str) -> String {
    let subtype = reported.rsplit('/').next().unwrap_or(reported);
    subtype.rsplit('-').next().unwrap_or(subtype).to_lowercase()
}

/// File name component of a path, lossily converted.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// The URL to persist for an asset.
pub fn resolve_url(path: &Path, public_base_url: Option<&str>) -> String {
    match public_base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), file_name_of(path)),
        None => path.to_string_lossy().into_owned(),
    }
}

/// Derive persistence metadata for a downloaded asset.
///
/// Images are inspected on the blocking pool; videos take format and
/// duration from what the backend reported, if anything.
pub async fn derive_metadata(
    asset: &DownloadedAsset,
    kind: MediaKind,
    public_base_url: Option<&str>,
) -> AssetMetadata {
    let file_name = file_name_of(&asset.path);

    let file_size_bytes = match tokio::fs::metadata(&asset.path).await {
        Ok(meta) => i64::try_from(meta.len()).ok(),
        Err(e) => {
            tracing::warn!(
                path = %asset.path.display(),
                error = %e,
                "Failed to read file size",
            );
            None
        }
    };

    let mut metadata = AssetMetadata {
        url: resolve_url(&asset.path, public_base_url),
        file_type: kind,
        file_name,
        file_size_bytes,
        width: None,
        height: None,
        duration_seconds: None,
        format: None,
    };

    match kind {
        MediaKind::Image => {
            let path = asset.path.clone();
            let inspected = tokio::task::spawn_blocking(move || inspect_image(&path)).await;
            match inspected {
                Ok(Ok(info)) => {
                    metadata.width = i32::try_from(info.width).ok();
                    metadata.height = i32::try_from(info.height).ok();
                    metadata.format = Some(info.format);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        path = %asset.path.display(),
                        error = %e,
                        "Failed to read image metadata",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %asset.path.display(),
                        error = %e,
                        "Image inspection task failed",
                    );
                }
            }
        }
        MediaKind::Video => {
            metadata.format = asset
                .descriptor
                .format
                .as_deref()
                .map(normalize_video_format);
            metadata.duration_seconds = asset.descriptor.duration_seconds;
        }
    }

    metadata
}
