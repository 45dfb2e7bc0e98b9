//! Generation task and generated file models.

use comfyrelay_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `generation_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationTask {
    /// Backend-assigned prompt ID; the job ID everywhere else.
    pub prompt_id: String,
    pub user_id: Option<String>,
    pub task_type: String,
    pub generation_style: Option<String>,
    pub input_prompt: Option<String>,
    pub input_image_url: Option<String>,
    /// One of `pending`, `completed`, `failed`.
    pub status: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a generation task at submission time.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGenerationTask {
    pub prompt_id: String,
    pub user_id: Option<String>,
    pub task_type: String,
    pub generation_style: Option<String>,
    pub input_prompt: Option<String>,
    pub input_image_url: Option<String>,
}

/// A row from the `generated_files` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GeneratedFile {
    pub id: DbId,
    pub prompt_id: String,
    pub file_url: String,
    /// `image` or `video`.
    pub file_type: String,
    pub file_name: String,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub format: Option<String>,
    pub created_at: Timestamp,
}
