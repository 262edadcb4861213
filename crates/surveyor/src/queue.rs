//! Bounded-concurrency evaluation queue with drain detection.
//!
//! Evaluation pipelines are memory-hungry, so at most
//! [`crate::constants::MAX_CONCURRENT_EVALS`] run at once and the
//! drain-time backfill is mutually exclusive with them: while
//! `backfill_running` is set, no queued item transitions to active
//! (in-flight jobs finish normally). Once the queue has been fully idle
//! for the quiet period, the drain handler runs the backfill hook and then
//! the continuation hook, which re-invokes the scheduler; queued work lost
//! to a crash is therefore recovered on the next tick.
//!
//! Both hooks are constructor arguments; there is no mutable registration.
//! Completions dispatch follow-up work through spawned tasks, never
//! recursive calls, so hundreds of rapid completions cannot grow the
//! stack.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::constants::{DRAIN_QUIET_PERIOD, MAX_CONCURRENT_EVALS};
use crate::error::{Error, Result};

/// The future a job runs to completion; yields the result artifact
/// filename.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// A queued invocable. Invoked exactly once when the item activates.
pub type JobFn = Box<dyn FnOnce() -> JobFuture + Send>;

/// Drain-time backfill hook.
pub type BackfillFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Post-drain continuation hook (re-invokes the scheduler).
pub type DrainedFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

struct QueueItem {
    config_id: String,
    job: JobFn,
    enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    active: usize,
    total_enqueued: u64,
    total_completed: u64,
    total_failed: u64,
    total_backfills: u64,
    last_completed: Option<(String, DateTime<Utc>)>,
    last_failed: Option<(String, DateTime<Utc>)>,
    /// Bumped on every enqueue and every timer arm; a drain timer only
    /// fires if the generation it captured is still current.
    drain_generation: u64,
}

/// Read-only snapshot of queue state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Jobs currently running.
    pub active: usize,
    /// Jobs waiting in FIFO order.
    pub queued: usize,
    /// Whether the drain-time backfill is running (gates dispatch).
    pub backfill_running: bool,
    /// Lifetime enqueue count.
    pub total_enqueued: u64,
    /// Lifetime completion count.
    pub total_completed: u64,
    /// Lifetime failure count.
    pub total_failed: u64,
    /// Lifetime backfill executions.
    pub total_backfills: u64,
    /// Last completed blueprint id and when.
    pub last_completed: Option<(String, DateTime<Utc>)>,
    /// Last failed blueprint id and when.
    pub last_failed: Option<(String, DateTime<Utc>)>,
    /// Process start time.
    pub started_at: DateTime<Utc>,
}

/// Receipt returned by [`EvalQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    /// 1-based position the item took in the pending list.
    pub position: usize,
    /// Pending length immediately after the append.
    pub queued: usize,
}

/// Builder for [`EvalQueue`].
pub struct EvalQueueBuilder {
    max_concurrent: usize,
    drain_quiet_period: Duration,
    on_backfill: Option<BackfillFn>,
    on_drained: Option<DrainedFn>,
}

impl EvalQueueBuilder {
    /// Maximum concurrent jobs (default 3).
    #[must_use]
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    /// Idle window before the drain handler fires (default 15 s).
    #[must_use]
    pub fn drain_quiet_period(mut self, period: Duration) -> Self {
        self.drain_quiet_period = period;
        self
    }

    /// Drain-time backfill hook. Absence skips the backfill phase.
    #[must_use]
    pub fn on_backfill(mut self, hook: BackfillFn) -> Self {
        self.on_backfill = Some(hook);
        self
    }

    /// Post-drain continuation hook. Absence skips the continuation.
    #[must_use]
    pub fn on_drained(mut self, hook: DrainedFn) -> Self {
        self.on_drained = Some(hook);
        self
    }

    /// Build the queue.
    #[must_use]
    pub fn build(self) -> EvalQueue {
        EvalQueue {
            core: Arc::new(QueueCore {
                max_concurrent: self.max_concurrent,
                drain_quiet_period: self.drain_quiet_period,
                on_backfill: self.on_backfill,
                on_drained: self.on_drained,
                backfill_running: AtomicBool::new(false),
                state: Mutex::new(QueueState::default()),
                started_at: Utc::now(),
            }),
        }
    }
}

struct QueueCore {
    max_concurrent: usize,
    drain_quiet_period: Duration,
    on_backfill: Option<BackfillFn>,
    on_drained: Option<DrainedFn>,
    backfill_running: AtomicBool,
    state: Mutex<QueueState>,
    started_at: DateTime<Utc>,
}

/// The evaluation queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct EvalQueue {
    core: Arc<QueueCore>,
}

impl EvalQueue {
    /// Builder with production defaults.
    #[must_use]
    pub fn builder() -> EvalQueueBuilder {
        EvalQueueBuilder {
            max_concurrent: MAX_CONCURRENT_EVALS,
            drain_quiet_period: DRAIN_QUIET_PERIOD,
            on_backfill: None,
            on_drained: None,
        }
    }

    /// Append a job and attempt dispatch.
    ///
    /// Cancels any pending drain timer: the queue is no longer idle.
    pub fn enqueue(&self, config_id: impl Into<String>, job: JobFn) -> EnqueueReceipt {
        let config_id = config_id.into();
        let receipt = {
            let mut state = self.core.state.lock();
            state.total_enqueued += 1;
            state.drain_generation += 1;
            state.pending.push_back(QueueItem {
                config_id: config_id.clone(),
                job,
                enqueued_at: Utc::now(),
            });
            EnqueueReceipt {
                position: state.pending.len(),
                queued: state.pending.len(),
            }
        };
        debug!(config_id = %config_id, position = receipt.position, "enqueued evaluation");
        Self::process_next(&self.core);
        receipt
    }

    /// Snapshot of queue state.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.core.state.lock();
        QueueStats {
            active: state.active,
            queued: state.pending.len(),
            backfill_running: self.core.backfill_running.load(Ordering::Acquire),
            total_enqueued: state.total_enqueued,
            total_completed: state.total_completed,
            total_failed: state.total_failed,
            total_backfills: state.total_backfills,
            last_completed: state.last_completed.clone(),
            last_failed: state.last_failed.clone(),
            started_at: self.core.started_at,
        }
    }

    /// Dispatch pending items while capacity allows and the backfill gate
    /// is clear. Each dispatched job runs in its own task.
    fn process_next(core: &Arc<QueueCore>) {
        loop {
            let item = {
                let mut state = core.state.lock();
                if core.backfill_running.load(Ordering::Acquire)
                    || state.active >= core.max_concurrent
                    || state.pending.is_empty()
                {
                    break;
                }
                state.active += 1;
                #[allow(clippy::unwrap_used)] // non-empty checked above
                state.pending.pop_front().unwrap()
            };
            let core = Arc::clone(core);
            tokio::spawn(async move {
                Self::run_item(core, item).await;
            });
        }
    }

    async fn run_item(core: Arc<QueueCore>, item: QueueItem) {
        let config_id = item.config_id;
        let waited = Utc::now()
            .signed_duration_since(item.enqueued_at)
            .num_milliseconds();
        debug!(config_id = %config_id, waited_ms = waited, "starting evaluation");

        // A panicking job must not leak an `active` slot; treat it as a
        // failure like any other rejection.
        let outcome = match std::panic::AssertUnwindSafe((item.job)()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(Error::Pipeline {
                config_id: config_id.clone(),
                reason: "evaluation task panicked".to_string(),
            }),
        };

        let drain_candidate = {
            let mut state = core.state.lock();
            state.active -= 1;
            match &outcome {
                Ok(file_name) => {
                    state.total_completed += 1;
                    state.last_completed = Some((config_id.clone(), Utc::now()));
                    info!(config_id = %config_id, file_name = %file_name, "evaluation completed");
                }
                Err(e) => {
                    state.total_failed += 1;
                    state.last_failed = Some((config_id.clone(), Utc::now()));
                    error!(config_id = %config_id, error = %e, "evaluation failed");
                }
            }
            state.active == 0 && state.pending.is_empty() && state.total_completed > 0
        };

        if drain_candidate {
            Self::arm_drain_timer(&core);
        }

        // Deferred tail dispatch: we are already in a spawned task and
        // dispatch itself spawns, so completion chains never recurse.
        Self::process_next(&core);
    }

    /// Arm (or rearm) the drain timer. The timer fires only if no enqueue
    /// and no rearm happened during the quiet period and the queue is
    /// still fully idle.
    fn arm_drain_timer(core: &Arc<QueueCore>) {
        let generation = {
            let mut state = core.state.lock();
            state.drain_generation += 1;
            state.drain_generation
        };
        debug!(generation, "queue idle, arming drain timer");

        let core = Arc::clone(core);
        tokio::spawn(async move {
            tokio::time::sleep(core.drain_quiet_period).await;

            let still_idle = {
                let state = core.state.lock();
                let idle = state.drain_generation == generation
                    && state.active == 0
                    && state.pending.is_empty()
                    && state.total_completed > 0;
                if idle {
                    // Close the gate under the same lock that verified
                    // idleness so no enqueue can slip a dispatch in
                    // between.
                    core.backfill_running.store(true, Ordering::Release);
                }
                idle
            };
            if !still_idle {
                debug!(generation, "drain timer cancelled by new work");
                return;
            }

            Self::run_drain_handler(&core).await;
        });
    }

    async fn run_drain_handler(core: &Arc<QueueCore>) {
        // Phase 1: backfill, with the dispatch gate held.
        if let Some(backfill) = &core.on_backfill {
            info!("queue drained, starting backfill");
            let started = Instant::now();
            match backfill().await {
                Ok(()) => {
                    info!(elapsed_ms = started.elapsed().as_millis() as u64, "backfill complete");
                }
                Err(e) => {
                    // No retry: the next drain will try again.
                    error!(error = %e, "backfill failed");
                }
            }
            core.state.lock().total_backfills += 1;
        }

        // Phase 2: release the gate and dispatch anything that queued up
        // while the backfill ran.
        core.backfill_running.store(false, Ordering::Release);
        Self::process_next(core);

        // Phase 3: continuation (re-invokes the scheduler).
        if let Some(drained) = &core.on_drained {
            if let Err(e) = drained().await {
                warn!(error = %e, "drain continuation failed");
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn immediate_job(name: &str) -> JobFn {
        let name = name.to_string();
        Box::new(move || Box::pin(async move { Ok(name) }) as JobFuture)
    }

    fn failing_job() -> JobFn {
        Box::new(|| {
            Box::pin(async {
                Err(Error::Pipeline {
                    config_id: "x".to_string(),
                    reason: "boom".to_string(),
                })
            }) as JobFuture
        })
    }

    fn sleeping_job(secs: u64) -> JobFn {
        Box::new(move || {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok("done.json".to_string())
            }) as JobFuture
        })
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counters_reflect_completions_and_failures() {
        let queue = EvalQueue::builder().build();
        queue.enqueue("a", immediate_job("a.json"));
        queue.enqueue("b", failing_job());
        settle().await;

        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, 2);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.last_completed.as_ref().unwrap().0, "a");
        assert_eq!(stats.last_failed.as_ref().unwrap().0, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let queue = EvalQueue::builder().max_concurrent(3).build();
        for i in 0..4 {
            queue.enqueue(format!("c{i}"), sleeping_job(10));
        }
        settle().await;

        let stats = queue.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.queued, 1);

        // First three finish; the fourth starts only then.
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        let stats = queue.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_counts_as_failed_and_frees_slot() {
        let queue = EvalQueue::builder().max_concurrent(1).build();
        queue.enqueue(
            "p",
            Box::new(|| {
                Box::pin(async {
                    #[allow(clippy::panic)]
                    let result: Result<String> = panic!("job blew up");
                    result
                }) as JobFuture
            }),
        );
        queue.enqueue("q", immediate_job("q.json"));
        settle().await;

        let stats = queue.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hundreds_of_rapid_completions_do_not_overflow() {
        let queue = EvalQueue::builder().build();
        for i in 0..801 {
            queue.enqueue(format!("c{i}"), immediate_job("x.json"));
        }
        for _ in 0..2000 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.stats().total_completed, 801);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_fires_after_quiet_period() {
        let backfills = Arc::new(AtomicUsize::new(0));
        let continuations = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&backfills);
        let c = Arc::clone(&continuations);
        let queue = EvalQueue::builder()
            .on_backfill(Arc::new(move || {
                let b = Arc::clone(&b);
                Box::pin(async move {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .on_drained(Arc::new(move || {
                let c = Arc::clone(&c);
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .build();

        queue.enqueue("a", immediate_job("a.json"));
        settle().await;
        assert_eq!(backfills.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(16)).await;
        settle().await;
        assert_eq!(backfills.load(Ordering::SeqCst), 1);
        assert_eq!(continuations.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().total_backfills, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_during_quiet_period_cancels_drain() {
        let backfills = Arc::new(AtomicUsize::new(0));
        let b = Arc::clone(&backfills);
        let queue = EvalQueue::builder()
            .on_backfill(Arc::new(move || {
                let b = Arc::clone(&b);
                Box::pin(async move {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .build();

        queue.enqueue("a", immediate_job("a.json"));
        settle().await;

        // 10 s into the 15 s window, new work arrives.
        tokio::time::sleep(Duration::from_secs(10)).await;
        queue.enqueue("b", immediate_job("b.json"));
        settle().await;

        // The original timer's deadline passes; it must not fire.
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(backfills.load(Ordering::SeqCst), 0);

        // The rearmed timer fires 15 s after the second completion.
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(backfills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_during_backfill_waits_for_gate() {
        let release_backfill = Arc::new(Notify::new());
        let backfill_started = Arc::new(Notify::new());
        let rb = Arc::clone(&release_backfill);
        let bs = Arc::clone(&backfill_started);
        let continuations = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&continuations);

        let queue = EvalQueue::builder()
            .on_backfill(Arc::new(move || {
                let rb = Arc::clone(&rb);
                let bs = Arc::clone(&bs);
                Box::pin(async move {
                    bs.notify_one();
                    rb.notified().await;
                    Ok(())
                })
            }))
            .on_drained(Arc::new(move || {
                let c = Arc::clone(&c);
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .build();

        queue.enqueue("a", immediate_job("a.json"));
        settle().await;
        tokio::time::sleep(Duration::from_secs(16)).await;
        backfill_started.notified().await;
        assert!(queue.stats().backfill_running);

        // New work during the backfill: stays queued, not started.
        queue.enqueue("late", immediate_job("late.json"));
        settle().await;
        let stats = queue.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.active, 0);

        // Gate clears: the pending item runs, then the continuation fires.
        release_backfill.notify_one();
        settle().await;
        let stats = queue.stats();
        assert!(!stats.backfill_running);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.total_completed, 2);
        assert_eq!(continuations.load(Ordering::SeqCst), 1);
    }
}
