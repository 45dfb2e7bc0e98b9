//! Repository for the `generated_files` table.

use comfyrelay_core::asset::AssetMetadata;
use sqlx::PgPool;

use crate::models::generation::GeneratedFile;

/// Column list for `generated_files` queries.
const COLUMNS: &str = "\
    id, prompt_id, file_url, file_type, file_name, file_size_bytes, \
    width, height, duration_seconds, format, created_at";

/// Provides insert and lookup operations for generated files.
pub struct GeneratedFileRepo;

impl GeneratedFileRepo {
    /// Insert a batch of file records for a task within one transaction.
    ///
    /// Rows that already exist for the same `(prompt_id, file_name)` are
    /// skipped, so re-running the batch after a partial failure is safe.
    /// Returns the number of newly inserted rows.
    pub async fn insert_batch(
        pool: &PgPool,
        prompt_id: &str,
        files: &[AssetMetadata],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut inserted = 0;

        for file in files {
            let result = sqlx::query(
                "INSERT INTO generated_files \
                 (prompt_id, file_url, file_type, file_name, file_size_bytes, \
                  width, height, duration_seconds, format) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (prompt_id, file_name) DO NOTHING",
            )
            .bind(prompt_id)
            .bind(&file.url)
            .bind(file.file_type.as_str())
            .bind(&file.file_name)
            .bind(file.file_size_bytes)
            .bind(file.width)
            .bind(file.height)
            .bind(file.duration_seconds)
            .bind(&file.format)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// List all files for a task in insertion order.
    pub async fn list_by_prompt_id(
        pool: &PgPool,
        prompt_id: &str,
    ) -> Result<Vec<GeneratedFile>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generated_files \
             WHERE prompt_id = $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, GeneratedFile>(&query)
            .bind(prompt_id)
            .fetch_all(pool)
            .await
    }
}
