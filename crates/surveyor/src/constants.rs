//! Centralized tuning constants.
//!
//! Every timing window and concurrency bound the orchestrator relies on
//! lives here so operational tuning happens in one place.

use std::time::Duration;

/// Maximum number of evaluation pipelines running concurrently.
///
/// Tuned down from an earlier value of 5 after OOM incidents: each pipeline
/// holds full result payloads in memory while the save phase runs.
pub const MAX_CONCURRENT_EVALS: usize = 3;

/// How long the queue must stay fully idle before the drain handler fires.
/// Any enqueue inside this window cancels and rearms the timer.
pub const DRAIN_QUIET_PERIOD: Duration = Duration::from_secs(15);

/// A blueprint whose latest run is younger than this is considered fresh
/// and is not rescheduled.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cap on entries in the latest-runs aggregate.
pub const LATEST_RUNS_CAP: usize = 50;

/// Cap on runs retained in a single per-config summary.
pub const PER_CONFIG_RUNS_CAP: usize = 20;

/// Maximum evaluation jobs a single scheduler tick may submit. The
/// remainder is picked up by the next tick or the post-drain continuation.
pub const DEFAULT_TICK_BATCH_LIMIT: usize = 200;

/// Bounded parallelism for per-config summary fetches during backfill.
pub const BACKFILL_FETCH_CONCURRENCY: usize = 10;

/// Default interval between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Delay before the first scheduler tick after process start.
pub const FIRST_TICK_DELAY: Duration = Duration::from_secs(60);

/// Standard HTTP request timeout for remote configuration fetches.
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard HTTP connect timeout.
pub const DEFAULT_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
