use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use comfyrelay_core::retry::RetryPolicy;

use crate::orchestrator::OrchestratorSettings;

/// Configuration errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Worker configuration loaded from environment variables.
///
/// Everything except the database and ComfyUI URLs has a default suitable
/// for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    /// ComfyUI HTTP base URL.
    pub comfy_url: String,
    /// Directory downloaded assets are written to.
    pub output_dir: PathBuf,
    /// When set, persisted file URLs are `{base}/{file_name}` instead of
    /// the local path.
    pub public_asset_base_url: Option<String>,
    pub image_retry_interval: Duration,
    pub video_retry_interval: Duration,
    pub max_attempts: u32,
    pub retry_jitter: Duration,
    /// Execution lock ttl; the longest a single attempt may plausibly run.
    pub lock_ttl: Duration,
    pub completion_ttl: Duration,
    pub poll_interval: Duration,
    pub concurrency: usize,
    pub http_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `DATABASE_URL`          | required                   |
    /// | `REDIS_URL`             | `redis://127.0.0.1:6379/2` |
    /// | `COMFY_URL`             | required                   |
    /// | `OUTPUT_DIR`            | `./outputs`                |
    /// | `PUBLIC_ASSET_BASE_URL` | unset                      |
    /// | `IMAGE_RETRY_SECS`      | `60`                       |
    /// | `VIDEO_RETRY_SECS`      | `300`                      |
    /// | `MAX_ATTEMPTS`          | `30`                       |
    /// | `RETRY_JITTER_SECS`     | `0`                        |
    /// | `LOCK_TTL_SECS`         | `900`                      |
    /// | `COMPLETION_TTL_SECS`   | `86400`                    |
    /// | `POLL_INTERVAL_MS`      | `1000`                     |
    /// | `WORKER_CONCURRENCY`    | `4`                        |
    /// | `HTTP_TIMEOUT_SECS`     | `60`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let max_attempts: u32 = env.parse_or("MAX_ATTEMPTS", 30)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_ATTEMPTS",
                value: "0".into(),
            });
        }

        let concurrency: usize = env.parse_or("WORKER_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".into(),
            });
        }

        let poll_interval_ms: u64 = env.parse_or("POLL_INTERVAL_MS", 1000)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_MS",
                value: "0".into(),
            });
        }

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            redis_url: env
                .optional("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/2".into()),
            comfy_url: env.required("COMFY_URL")?,
            output_dir: env
                .optional("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./outputs")),
            public_asset_base_url: env.optional("PUBLIC_ASSET_BASE_URL"),
            image_retry_interval: Duration::from_secs(env.parse_or("IMAGE_RETRY_SECS", 60)?),
            video_retry_interval: Duration::from_secs(env.parse_or("VIDEO_RETRY_SECS", 300)?),
            max_attempts,
            retry_jitter: Duration::from_secs(env.parse_or("RETRY_JITTER_SECS", 0)?),
            lock_ttl: Duration::from_secs(env.parse_or("LOCK_TTL_SECS", 900)?),
            completion_ttl: Duration::from_secs(env.parse_or("COMPLETION_TTL_SECS", 86_400)?),
            poll_interval: Duration::from_millis(poll_interval_ms),
            concurrency,
            http_timeout: Duration::from_secs(env.parse_or("HTTP_TIMEOUT_SECS", 60)?),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            image_interval: self.image_retry_interval,
            video_interval: self.video_retry_interval,
            max_attempts: self.max_attempts,
            max_jitter: self.retry_jitter,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            lock_ttl: self.lock_ttl,
            completion_ttl: self.completion_ttl,
            public_base_url: self.public_asset_base_url.clone(),
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `key`, trimmed.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
            None => Ok(default),
        }
    }
}
