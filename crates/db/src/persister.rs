//! [`ResultPersister`] backed by PostgreSQL.

use async_trait::async_trait;
use comfyrelay_core::asset::AssetMetadata;
use comfyrelay_core::generation::TaskStatus;
use comfyrelay_core::persistence::{PersistError, ResultPersister};

use crate::repositories::{GeneratedFileRepo, GenerationTaskRepo};
use crate::DbPool;

/// Writes generated-file rows and task status through the repositories.
#[derive(Debug, Clone)]
pub struct PgResultPersister {
    pool: DbPool,
}

impl PgResultPersister {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> PersistError {
    PersistError::Database(e.to_string())
}

#[async_trait]
impl ResultPersister for PgResultPersister {
    async fn append_asset_records(
        &self,
        job_id: &str,
        batch: &[AssetMetadata],
    ) -> Result<(), PersistError> {
        let inserted = GeneratedFileRepo::insert_batch(&self.pool, job_id, batch)
            .await
            .map_err(db_err)?;
        tracing::info!(
            job_id,
            batch = batch.len(),
            inserted,
            "Persisted generated file records",
        );
        Ok(())
    }

    async fn set_job_status(&self, job_id: &str, status: TaskStatus) -> Result<(), PersistError> {
        let updated = GenerationTaskRepo::update_status(&self.pool, job_id, status)
            .await
            .map_err(db_err)?;
        if !updated {
            return Err(PersistError::TaskNotFound(job_id.to_string()));
        }
        Ok(())
    }
}
