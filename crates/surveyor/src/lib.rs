//! # Surveyor: periodic evaluation orchestrator
//!
//! Surveyor measures how accurately language models predict demographic
//! survey-response distributions. This crate is the orchestration core: it
//! discovers blueprint configurations in a remote source tree, decides
//! which ones need a fresh evaluation run, executes each run under strict
//! concurrency and memory discipline, and keeps the aggregate summary
//! artifacts that downstream dashboards consume.
//!
//! ## Architecture
//!
//! ```text
//! cron / admin endpoint / post-drain continuation
//!        │
//!        ▼
//!  Scheduler ──► parse + normalise ──► freshness ──► EvalQueue (N=3)
//!                                                       │
//!                                                       ▼
//!                                                PipelineRunner
//!                                                       │
//!                                                       ▼
//!                                           SummaryUpdater (serialised)
//!                                                       │
//!                                        drain ──► LightweightBackfill
//!                                                       │
//!                                                 continuation
//! ```
//!
//! Data flows one way; control loops back only through the queue's
//! post-drain continuation, which re-invokes the scheduler. A crash that
//! loses queued work is recovered on the next cron tick or continuation;
//! there is no persistent queue.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use surveyor::{
//!     EvalQueue, LightweightBackfill, MemoryObjectStore, Scheduler, SchedulerConfig,
//!     SummaryUpdater, TickOptions,
//! };
//!
//! # async fn example(
//! #     source: Arc<dyn surveyor::ConfigSource>,
//! #     runner: Arc<dyn surveyor::PipelineRunner>,
//! # ) -> surveyor::Result<()> {
//! let store = Arc::new(MemoryObjectStore::new());
//! let updater = SummaryUpdater::spawn(store.clone());
//! let scheduler = Scheduler::new(source, store.clone(), runner, updater, SchedulerConfig::default());
//!
//! let backfill = LightweightBackfill::new(store.clone());
//! let queue = EvalQueue::builder()
//!     .on_backfill(Arc::new(move || {
//!         let backfill = LightweightBackfill::new(store.clone());
//!         Box::pin(async move { backfill.run().await.map(|_| ()) })
//!     }))
//!     .build();
//!
//! scheduler.tick(&queue, TickOptions::default()).await?;
//! # let _ = backfill;
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod blueprint;
pub mod constants;
pub mod error;
pub mod hash;
pub mod models;
pub mod queue;
pub mod run;
pub mod runner;
pub mod scheduler;
pub mod scoring;
pub mod source;
pub mod store;
pub mod summaries;
pub mod tags;
pub mod timestamp;
pub mod updater;

pub use backfill::{BackfillReport, LightweightBackfill};
pub use blueprint::{
    config_id_from_path, parse_blueprint, Blueprint, BlueprintFormat, ModelRef, Prompt,
    ResolvedBlueprint,
};
pub use error::{Error, Result};
pub use hash::run_label;
pub use models::{ModelCatalog, MODEL_CATALOG_PATH};
pub use queue::{EvalQueue, EvalQueueBuilder, JobFn, JobFuture, QueueStats};
pub use run::{CoverageScore, RunResult, TimingInfo};
pub use runner::{PipelineRequest, PipelineRunner};
pub use scheduler::{Scheduler, SchedulerConfig, TickOptions, TickReport};
pub use scoring::{
    expected_distribution, per_option_accuracy, DistributionArgs, DistributionMetric,
    PointOutcome,
};
pub use source::{ConfigSource, TreeEntry};
pub use store::{MemoryObjectStore, ObjectMeta, ObjectStore};
pub use summaries::{
    FleetSummary, HomepageSummary, LatestRunsSummary, LeanRun, ModelSummary, PerConfigSummary,
    ScoreStats,
};
pub use updater::{SummaryUpdater, UpdateRequest};
