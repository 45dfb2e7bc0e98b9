use std::sync::Arc;

use anyhow::Context;
use comfyrelay_comfyui::api::ComfyUIApi;
use comfyrelay_comfyui::backend::ComfyUIBackend;
use comfyrelay_db::persister::PgResultPersister;
use comfyrelay_worker::config::WorkerConfig;
use comfyrelay_worker::dispatcher::RedisAttemptQueue;
use comfyrelay_worker::lock_store::RedisLockStore;
use comfyrelay_worker::orchestrator::CompletionOrchestrator;
use comfyrelay_worker::runner::WorkerRunner;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyrelay_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;

    let pool = comfyrelay_db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    comfyrelay_db::health_check(&pool).await?;
    comfyrelay_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("Database ready");

    let redis = redis::Client::open(config.redis_url.as_str())?;
    let conn = redis::aio::ConnectionManager::new(redis)
        .await
        .context("failed to connect to Redis")?;
    tracing::info!("Redis ready");

    let api = ComfyUIApi::with_timeout(&config.comfy_url, config.http_timeout)?;
    tracing::info!(comfy_url = %api.api_url(), "ComfyUI client configured");

    let orchestrator = Arc::new(CompletionOrchestrator::new(
        Arc::new(RedisLockStore::new(conn.clone())),
        Arc::new(ComfyUIBackend::new(api, config.output_dir.clone())),
        Arc::new(PgResultPersister::new(pool)),
        config.retry_policy(),
        config.orchestrator_settings(),
    ));
    let runner = WorkerRunner::new(
        orchestrator,
        Arc::new(RedisAttemptQueue::new(conn)),
        config.poll_interval,
        config.concurrency,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    runner.run(cancel).await;
    Ok(())
}
