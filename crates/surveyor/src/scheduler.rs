//! Periodic scheduler: discovery, freshness, dispatch.
//!
//! Each tick lists the blueprint tree, parses and normalises every file,
//! decides which blueprints warrant a run, and enqueues evaluation jobs.
//! Per-blueprint failures are isolated (logged, counted, and skipped),
//! but a failure to list the tree aborts the whole tick, because the
//! scheduler cannot know what it missed.
//!
//! Freshness is hash-agnostic: prior run labels are ignored on purpose.
//! Re-resolving a model-group alias changes the content hash without
//! changing the blueprint's observable intent, and re-running on every
//! alias change would waste compute.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::blueprint::{is_discoverable_blueprint_path, parse_blueprint, Blueprint};
use crate::constants::{DEFAULT_TICK_BATCH_LIMIT, FRESHNESS_WINDOW};
use crate::error::{Error, Result};
use crate::hash::run_label;
use crate::models::ModelCatalog;
use crate::queue::{EvalQueue, JobFn, JobFuture};
use crate::runner::{PipelineRequest, PipelineRunner};
use crate::source::ConfigSource;
use crate::store::{self, keys, ObjectStore};
use crate::timestamp::timestamp_from_result_filename;
use crate::updater::{SummaryUpdater, UpdateRequest};

/// Bounded parallelism for blueprint content fetches within one tick.
const FETCH_CONCURRENCY: usize = 10;

/// Scheduler configuration.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Runs younger than this are fresh and not rescheduled.
    pub freshness_window: Duration,
    /// Default per-tick cap on submitted jobs.
    pub batch_limit: usize,
    /// Evaluation methods forwarded to the pipeline.
    pub eval_methods: Vec<String>,
    /// Whether pipelines may serve model responses from cache.
    pub use_cache: bool,
    /// When set, only blueprints whose id starts with this prefix are
    /// considered: one process per shard, disjoint key prefixes.
    pub shard_prefix: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            freshness_window: FRESHNESS_WINDOW,
            batch_limit: DEFAULT_TICK_BATCH_LIMIT,
            eval_methods: vec!["standard".to_string()],
            use_cache: true,
            shard_prefix: None,
        }
    }
}

/// Per-invocation options (from cron defaults or the admin endpoint).
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOptions {
    /// Schedule every periodic blueprint regardless of freshness.
    pub force: bool,
    /// Override the configured batch limit.
    pub limit: Option<usize>,
}

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Blueprint files discovered in the tree.
    pub discovered: usize,
    /// Jobs submitted to the queue.
    pub scheduled: usize,
    /// Skipped: latest run is inside the freshness window.
    pub skipped_fresh: usize,
    /// Skipped: no `_periodic` tag.
    pub skipped_not_periodic: usize,
    /// Skipped: derived id uses a reserved prefix.
    pub skipped_reserved: usize,
    /// Skipped: model list resolved to nothing.
    pub skipped_no_models: usize,
    /// Skipped: outside this process's shard.
    pub skipped_out_of_shard: usize,
    /// Left for a later tick by the batch limit.
    pub deferred_by_limit: usize,
    /// Per-blueprint failures (parse, fetch, resolution).
    pub failures: usize,
}

enum Decision {
    Schedule(String, JobFn),
    SkipFresh,
    SkipNotPeriodic,
    SkipNoModels,
    SkipOutOfShard,
}

/// The periodic scheduler. The queue is passed per tick so the post-drain
/// continuation can close over the scheduler without a reference cycle.
pub struct Scheduler {
    source: Arc<dyn ConfigSource>,
    store: Arc<dyn ObjectStore>,
    runner: Arc<dyn PipelineRunner>,
    updater: SummaryUpdater,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        source: Arc<dyn ConfigSource>,
        store: Arc<dyn ObjectStore>,
        runner: Arc<dyn PipelineRunner>,
        updater: SummaryUpdater,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            store,
            runner,
            updater,
            config,
        }
    }

    /// Run one scheduling tick.
    ///
    /// # Errors
    ///
    /// Only a top-level tree-listing failure aborts the tick; every
    /// per-blueprint error is isolated and counted in the report.
    pub async fn tick(&self, queue: &EvalQueue, options: TickOptions) -> Result<TickReport> {
        let mut report = TickReport::default();

        let entries = self.source.list_tree().await.map_err(|e| {
            error!(error = %e, "tree listing failed, aborting tick");
            e
        })?;

        let commit_sha = match self.source.latest_commit().await {
            Ok(sha) => Some(sha),
            Err(e) => {
                warn!(error = %e, "could not resolve latest commit, running without provenance");
                None
            }
        };

        // One catalogue fetch per tick. When it is unreachable, blueprints
        // that need alias expansion fail loudly; concrete-only blueprints
        // still proceed.
        let catalog = match ModelCatalog::fetch(self.source.as_ref()).await {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!(error = %e, "model catalogue unreachable this tick");
                None
            }
        };

        let paths: Vec<String> = entries
            .into_iter()
            .filter(|entry| is_discoverable_blueprint_path(&entry.path))
            .map(|entry| entry.path)
            .collect();
        report.discovered = paths.len();
        info!(discovered = report.discovered, force = options.force, "scheduler tick started");

        let blueprints = self.fetch_and_parse(paths, &mut report).await;

        let limit = options.limit.unwrap_or(self.config.batch_limit);
        for bp in blueprints {
            match self
                .consider(&bp, catalog.as_ref(), commit_sha.clone(), options.force)
                .await
            {
                Ok(Decision::Schedule(config_id, job)) => {
                    if report.scheduled < limit {
                        report.scheduled += 1;
                        queue.enqueue(config_id, job);
                    } else {
                        report.deferred_by_limit += 1;
                    }
                }
                Ok(Decision::SkipFresh) => report.skipped_fresh += 1,
                Ok(Decision::SkipNotPeriodic) => report.skipped_not_periodic += 1,
                Ok(Decision::SkipNoModels) => report.skipped_no_models += 1,
                Ok(Decision::SkipOutOfShard) => report.skipped_out_of_shard += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(config_id = %bp.id, error = %e, "blueprint skipped after error");
                }
            }
        }

        info!(
            scheduled = report.scheduled,
            skipped_fresh = report.skipped_fresh,
            deferred = report.deferred_by_limit,
            failures = report.failures,
            "scheduler tick finished"
        );
        Ok(report)
    }

    /// Fetch and parse blueprint files with bounded parallelism. Fetch and
    /// parse failures are isolated per blueprint; reserved-prefix ids are
    /// tallied separately. Duplicate derived ids are a misconfiguration:
    /// ids are a pure function of path, so a collision means two paths
    /// normalise identically. Logged loudly, last one wins.
    async fn fetch_and_parse(&self, paths: Vec<String>, report: &mut TickReport) -> Vec<Blueprint> {
        let fetched: Vec<(String, Result<String>)> = stream::iter(paths)
            .map(|path| async move {
                let content = self.source.fetch_file(&path).await;
                (path, content)
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut blueprints: Vec<Blueprint> = Vec::new();

        for (path, content) in fetched {
            let content = match content {
                Ok(content) => content,
                Err(e) => {
                    report.failures += 1;
                    warn!(path = %path, error = %e, "blueprint fetch failed");
                    continue;
                }
            };
            match parse_blueprint(&path, &content) {
                Ok(bp) => {
                    if let Some(previous) = by_id.insert(bp.id.clone(), blueprints.len()) {
                        error!(
                            config_id = %bp.id,
                            "duplicate derived blueprint id, two source paths normalise \
                             identically; last one wins"
                        );
                        blueprints.remove(previous);
                        // Re-home the displaced indices.
                        by_id = blueprints
                            .iter()
                            .enumerate()
                            .map(|(i, b)| (b.id.clone(), i))
                            .collect();
                        by_id.insert(bp.id.clone(), blueprints.len());
                    }
                    blueprints.push(bp);
                }
                Err(Error::ReservedId(id)) => {
                    report.skipped_reserved += 1;
                    warn!(path = %path, config_id = %id, "derived id is reserved, skipping");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(path = %path, error = %e, "blueprint parse failed");
                }
            }
        }
        blueprints
    }

    /// Decide whether one blueprint warrants a run, and build its job.
    async fn consider(
        &self,
        bp: &Blueprint,
        catalog: Option<&ModelCatalog>,
        commit_sha: Option<String>,
        force: bool,
    ) -> Result<Decision> {
        if let Some(prefix) = &self.config.shard_prefix {
            if !bp.id.starts_with(prefix.as_str()) {
                return Ok(Decision::SkipOutOfShard);
            }
        }

        if !bp.is_periodic() {
            debug!(config_id = %bp.id, "not periodic, skipping");
            return Ok(Decision::SkipNotPeriodic);
        }

        let needs_catalog = bp
            .models
            .iter()
            .any(|m| matches!(m, crate::blueprint::ModelRef::Symbolic(_)));
        let models = match catalog {
            Some(catalog) => catalog.resolve(&bp.models),
            None if needs_catalog => {
                return Err(Error::ModelResolution(
                    "catalogue unavailable and blueprint uses group aliases".to_string(),
                ));
            }
            None => ModelCatalog::default().resolve(&bp.models),
        };
        if models.is_empty() {
            warn!(config_id = %bp.id, "model list resolved to nothing, skipping");
            return Ok(Decision::SkipNoModels);
        }

        if !force && self.is_fresh(&bp.id).await? {
            debug!(config_id = %bp.id, "skip fresh");
            return Ok(Decision::SkipFresh);
        }

        let resolved = crate::blueprint::ResolvedBlueprint {
            id: bp.id.clone(),
            title: bp.title.clone(),
            description: bp.description.clone(),
            prompts: bp.prompts.clone(),
            models,
            tags: bp.tags.clone(),
        };
        let label = run_label(&resolved);
        let request = PipelineRequest {
            blueprint: resolved,
            run_label: label,
            eval_methods: self.config.eval_methods.clone(),
            commit_sha,
            use_cache: self.config.use_cache,
        };

        let runner = Arc::clone(&self.runner);
        let store = Arc::clone(&self.store);
        let updater = self.updater.clone();
        let config_id = bp.id.clone();
        let job_id = config_id.clone();

        let job: JobFn = Box::new(move || {
            Box::pin(async move {
                let file_name = runner.execute(request).await?;
                post_run_update(store.as_ref(), &updater, &config_id, &file_name).await;
                Ok(file_name)
            }) as JobFuture
        });

        Ok(Decision::Schedule(job_id, job))
    }

    /// Hash-agnostic freshness: only the latest run's filename-derived
    /// timestamp matters. Runs with unusable filenames count as absent.
    async fn is_fresh(&self, config_id: &str) -> Result<bool> {
        let listed = self
            .store
            .list_prefix(&keys::result_prefix(config_id))
            .await?;
        let latest = listed
            .iter()
            .filter_map(|meta| timestamp_from_result_filename(&meta.key))
            .max();
        Ok(match latest {
            Some(ts) => age_of(ts) < self.config.freshness_window,
            None => false,
        })
    }
}

fn age_of(ts: DateTime<Utc>) -> Duration {
    Utc::now()
        .signed_duration_since(ts)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Post-run hook: read the artifact back and fold it into the incremental
/// summaries. The pipeline already succeeded, so failures here only log;
/// the next drain-time backfill reconstructs aggregate state from the
/// per-config summaries.
async fn post_run_update(
    store: &dyn ObjectStore,
    updater: &SummaryUpdater,
    config_id: &str,
    file_name: &str,
) {
    let key = keys::result_artifact(config_id, file_name);
    let result = match store::get_json::<crate::run::RunResult>(store, &key).await {
        Ok(Some(result)) => result,
        Ok(None) => {
            error!(key = %key, "pipeline reported success but artifact is missing");
            return;
        }
        Err(e) => {
            error!(key = %key, error = %e, "could not read result artifact for summary update");
            return;
        }
    };

    if let Err(e) = updater
        .apply(UpdateRequest {
            config_id: config_id.to_string(),
            result,
            file_name: file_name.to_string(),
        })
        .await
    {
        error!(config_id = %config_id, error = %e, "incremental summary update failed after run");
    }
}
