//! Typed parsing of ComfyUI `/history/{prompt_id}` responses.
//!
//! ComfyUI answers with `{"<prompt_id>": {"outputs": {"<node_id>": {...}}}}`
//! once a prompt has finished, and with `{}` before that. Each output node
//! lists its files under `images` (image nodes) or `gifs` / `videos`
//! (video combine nodes).

use comfyrelay_core::generation::MediaKind;
use comfyrelay_core::render_backend::{AssetDescriptor, JobOutputs, SlotOutputs};
use serde::Deserialize;

/// Default ComfyUI folder type for generated files.
const DEFAULT_FOLDER_TYPE: &str = "output";

/// One file entry inside a node's output lists.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
    /// Reported by video combine nodes, e.g. `video/h264-mp4`.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub frame_rate: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

fn default_folder_type() -> String {
    DEFAULT_FOLDER_TYPE.to_string()
}

/// Output lists of a single node. Unknown keys (`text`, `latents`, ...)
/// are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputFile>,
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub videos: Vec<OutputFile>,
}

impl OutputFile {
    fn into_descriptor(self, media: MediaKind) -> AssetDescriptor {
        AssetDescriptor {
            filename: self.filename,
            subfolder: self.subfolder,
            folder_type: self.folder_type,
            media,
            format: self.format,
            frame_rate: self.frame_rate,
            duration_seconds: self.duration,
        }
    }
}

impl NodeOutput {
    fn into_slot(self) -> SlotOutputs {
        SlotOutputs {
            images: self
                .images
                .into_iter()
                .map(|f| f.into_descriptor(MediaKind::Image))
                .collect(),
            videos: self
                .gifs
                .into_iter()
                .chain(self.videos)
                .map(|f| f.into_descriptor(MediaKind::Video))
                .collect(),
        }
    }
}

/// Extract the outputs for `prompt_id` from a raw history response.
///
/// A missing prompt entry or an empty `outputs` object yields empty
/// [`JobOutputs`] ("not ready yet"). A node whose shape cannot be parsed
/// becomes an empty slot and is logged.
pub fn parse_outputs(history: &serde_json::Value, prompt_id: &str) -> JobOutputs {
    let mut outputs = JobOutputs::default();

    let Some(nodes) = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|o| o.as_object())
    else {
        return outputs;
    };

    for (node_id, raw) in nodes {
        let node = match serde_json::from_value::<NodeOutput>(raw.clone()) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(
                    prompt_id,
                    node_id = %node_id,
                    error = %e,
                    "Unrecognised ComfyUI node output",
                );
                NodeOutput::default()
            }
        };
        outputs.slots.insert(node_id.clone(), node.into_slot());
    }

    outputs
}
