//! Environment-driven server configuration.

use std::time::Duration;
use surveyor::constants::{DEFAULT_TICK_INTERVAL, FIRST_TICK_DELAY};

/// Configuration for the server process, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind (`SURVEYOR_BIND_ADDR`, default `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Shared secret for the admin endpoints (`SURVEYOR_ADMIN_SECRET`).
    /// Unset means every admin request is rejected.
    pub admin_secret: Option<String>,
    /// Configuration-source repository owner (`SURVEYOR_GITHUB_OWNER`).
    pub github_owner: String,
    /// Configuration-source repository name (`SURVEYOR_GITHUB_REPO`).
    pub github_repo: String,
    /// Branch to read (`SURVEYOR_GITHUB_BRANCH`, default `main`).
    pub github_branch: String,
    /// Bearer token for the source (`GITHUB_TOKEN`, optional).
    pub github_token: Option<String>,
    /// Artifact bucket (`SURVEYOR_S3_BUCKET`).
    pub s3_bucket: String,
    /// Optional bucket-level key prefix (`SURVEYOR_S3_PREFIX`).
    pub s3_prefix: Option<String>,
    /// Pipeline service base URL (`SURVEYOR_PIPELINE_URL`).
    pub pipeline_url: String,
    /// Interval between cron ticks (`SURVEYOR_TICK_INTERVAL_SECS`).
    pub tick_interval: Duration,
    /// Delay before the first tick (`SURVEYOR_FIRST_TICK_DELAY_SECS`).
    pub first_tick_delay: Duration,
    /// Shard prefix for horizontal scaling (`SURVEYOR_SHARD_PREFIX`).
    pub shard_prefix: Option<String>,
}

/// Errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is set but unparsable.
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Observed value.
        value: String,
    },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn duration_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a
    /// numeric one does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: optional("SURVEYOR_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            admin_secret: optional("SURVEYOR_ADMIN_SECRET"),
            github_owner: required("SURVEYOR_GITHUB_OWNER")?,
            github_repo: required("SURVEYOR_GITHUB_REPO")?,
            github_branch: optional("SURVEYOR_GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
            github_token: optional("GITHUB_TOKEN"),
            s3_bucket: required("SURVEYOR_S3_BUCKET")?,
            s3_prefix: optional("SURVEYOR_S3_PREFIX"),
            pipeline_url: required("SURVEYOR_PIPELINE_URL")?,
            tick_interval: duration_secs("SURVEYOR_TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL)?,
            first_tick_delay: duration_secs("SURVEYOR_FIRST_TICK_DELAY_SECS", FIRST_TICK_DELAY)?,
            shard_prefix: optional("SURVEYOR_SHARD_PREFIX"),
        })
    }
}
