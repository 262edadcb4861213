//! # Surveyor server
//!
//! Process wiring and HTTP surface for the orchestrator: the admin
//! endpoints (schedule, backfill, status), the in-process cron, and the
//! hook plumbing that ties the evaluation queue's drain handler to the
//! lightweight backfill and the scheduler continuation.

pub mod config;
pub mod pipeline_client;
pub mod routes;

use std::sync::{Arc, OnceLock};
use surveyor::{
    EvalQueue, LightweightBackfill, ObjectStore, PipelineRunner, Scheduler, SchedulerConfig,
    ConfigSource, SummaryUpdater, TickOptions,
};
use tracing::{error, info};

pub use config::ServerConfig;
pub use pipeline_client::HttpPipelineRunner;
pub use routes::{build_router, AppState, ADMIN_SECRET_HEADER};

/// Everything a running orchestrator process needs.
pub struct Orchestrator {
    /// The scheduler.
    pub scheduler: Arc<Scheduler>,
    /// The evaluation queue, with drain hooks wired.
    pub queue: EvalQueue,
    /// The backfill (shared with the queue's drain hook).
    pub backfill: Arc<LightweightBackfill>,
}

/// Wire scheduler, queue, updater, and backfill together.
///
/// The queue's hooks are constructor arguments, so the continuation (which
/// needs the queue itself to enqueue follow-up work) closes over a slot
/// that is filled immediately after the queue is built. A drain can only
/// fire after a completion, which requires an enqueue, which requires the
/// slot to be filled.
#[must_use]
pub fn wire(
    source: Arc<dyn ConfigSource>,
    store: Arc<dyn ObjectStore>,
    runner: Arc<dyn PipelineRunner>,
    scheduler_config: SchedulerConfig,
) -> Orchestrator {
    let updater = SummaryUpdater::spawn(Arc::clone(&store));
    let scheduler = Arc::new(Scheduler::new(
        source,
        Arc::clone(&store),
        runner,
        updater,
        scheduler_config,
    ));
    let backfill = Arc::new(LightweightBackfill::new(store));

    let queue_slot: Arc<OnceLock<EvalQueue>> = Arc::new(OnceLock::new());

    let backfill_hook = Arc::clone(&backfill);
    let continuation_scheduler = Arc::clone(&scheduler);
    let continuation_slot = Arc::clone(&queue_slot);

    let queue = EvalQueue::builder()
        .on_backfill(Arc::new(move || {
            let backfill = Arc::clone(&backfill_hook);
            Box::pin(async move { backfill.run().await.map(|_| ()) })
        }))
        .on_drained(Arc::new(move || {
            let scheduler = Arc::clone(&continuation_scheduler);
            let slot = Arc::clone(&continuation_slot);
            Box::pin(async move {
                let Some(queue) = slot.get() else {
                    return Ok(());
                };
                let report = scheduler.tick(queue, TickOptions::default()).await?;
                info!(scheduled = report.scheduled, "continuation tick finished");
                Ok(())
            })
        }))
        .build();

    // Infallible: this is the only writer.
    let _ = queue_slot.set(queue.clone());

    Orchestrator {
        scheduler,
        queue,
        backfill,
    }
}

/// Spawn the periodic cron: first tick after `first_tick_delay`, then one
/// every `tick_interval`. Tick failures are logged and the loop continues.
pub fn spawn_cron(
    scheduler: Arc<Scheduler>,
    queue: EvalQueue,
    config: &ServerConfig,
) -> tokio::task::JoinHandle<()> {
    let first_delay = config.first_tick_delay;
    let interval = config.tick_interval;
    tokio::spawn(async move {
        tokio::time::sleep(first_delay).await;
        loop {
            match scheduler.tick(&queue, TickOptions::default()).await {
                Ok(report) => {
                    info!(
                        scheduled = report.scheduled,
                        skipped_fresh = report.skipped_fresh,
                        failures = report.failures,
                        "cron tick finished"
                    );
                }
                Err(e) => {
                    error!(error = %e, "cron tick aborted");
                }
            }
            tokio::time::sleep(interval).await;
        }
    })
}
