//! Surveyor orchestrator entrypoint.

use std::sync::Arc;
use surveyor::SchedulerConfig;
use surveyor_github::GithubConfigSource;
use surveyor_s3_store::S3ObjectStore;
use surveyor_server::{
    build_router, spawn_cron, wire, AppState, HttpPipelineRunner, ServerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env()?;
    if config.admin_secret.is_none() {
        tracing::warn!("SURVEYOR_ADMIN_SECRET unset; admin endpoints will reject every request");
    }

    let source = GithubConfigSource::new(&config.github_owner, &config.github_repo)
        .with_branch(&config.github_branch)
        .with_token(config.github_token.clone());

    let mut store = S3ObjectStore::new(&config.s3_bucket).await?;
    if let Some(prefix) = &config.s3_prefix {
        store = store.with_prefix(prefix);
    }

    let runner = HttpPipelineRunner::new(&config.pipeline_url);

    let scheduler_config = SchedulerConfig {
        shard_prefix: config.shard_prefix.clone(),
        ..SchedulerConfig::default()
    };

    let orchestrator = wire(
        Arc::new(source),
        Arc::new(store),
        Arc::new(runner),
        scheduler_config,
    );

    spawn_cron(
        Arc::clone(&orchestrator.scheduler),
        orchestrator.queue.clone(),
        &config,
    );

    let state = AppState {
        scheduler: orchestrator.scheduler,
        queue: orchestrator.queue,
        backfill: orchestrator.backfill,
        admin_secret: config.admin_secret.clone(),
        started_at: chrono::Utc::now(),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "surveyor server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
