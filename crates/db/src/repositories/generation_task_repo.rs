//! Repository for the `generation_tasks` table.

use comfyrelay_core::generation::TaskStatus;
use sqlx::PgPool;

use crate::models::generation::{CreateGenerationTask, GenerationTask};

/// Column list for `generation_tasks` queries.
const COLUMNS: &str = "\
    prompt_id, user_id, task_type, generation_style, input_prompt, \
    input_image_url, status, created_at, updated_at";

/// Provides CRUD operations for generation tasks.
pub struct GenerationTaskRepo;

impl GenerationTaskRepo {
    /// Create a new task in `pending` status.
    pub async fn create(
        pool: &PgPool,
        input: &CreateGenerationTask,
    ) -> Result<GenerationTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_tasks \
             (prompt_id, user_id, task_type, generation_style, input_prompt, input_image_url, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(&input.prompt_id)
            .bind(&input.user_id)
            .bind(&input.task_type)
            .bind(&input.generation_style)
            .bind(&input.input_prompt)
            .bind(&input.input_image_url)
            .bind(TaskStatus::Pending.as_str())
            .fetch_one(pool)
            .await
    }

    /// Set the status of a task.
    ///
    /// Returns `false` if no task with that prompt ID exists.
    pub async fn update_status(
        pool: &PgPool,
        prompt_id: &str,
        status: TaskStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE generation_tasks SET status = $2 WHERE prompt_id = $1")
            .bind(prompt_id)
            .bind(status.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a task by its prompt ID.
    pub async fn find_by_prompt_id(
        pool: &PgPool,
        prompt_id: &str,
    ) -> Result<Option<GenerationTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_tasks WHERE prompt_id = $1");
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(prompt_id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's tasks, newest first.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: &str,
    ) -> Result<Vec<GenerationTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_tasks \
             WHERE user_id = $1 \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, GenerationTask>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }
}
