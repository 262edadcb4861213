//! Incremental summary updater.
//!
//! After every completed run the three small summaries (per-config,
//! fleet-wide, latest-N) must be brought up to date. Each step is a
//! read-modify-write against the object store, which interleaves at every
//! await: two concurrent updates would read the same baseline and the
//! later write would silently clobber the earlier one. All updates are
//! therefore funnelled through one in-order worker task that owns the
//! three artifacts and accepts requests over a channel.
//!
//! A failed step is logged and fails its request, but never poisons the
//! worker: the next request proceeds, and the next drain-time backfill
//! reconstructs fleet-wide state from the per-config summaries anyway.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::run::RunResult;
use crate::store::{self, keys, ObjectStore};
use crate::summaries::{
    fleet_entry_of, upsert_per_config, FleetSummary, LatestRunsSummary, LeanRun,
};
use crate::timestamp::timestamp_from_result_filename;

/// One completed run to fold into the summaries.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Blueprint id.
    pub config_id: String,
    /// The raw result artifact body.
    pub result: RunResult,
    /// Artifact filename; its embedded timestamp is canonical.
    pub file_name: String,
}

struct Job {
    request: UpdateRequest,
    done: oneshot::Sender<Result<()>>,
}

/// Handle to the in-order summary worker. Cloning shares the same worker;
/// dropping every handle shuts it down once the queue drains.
#[derive(Clone)]
pub struct SummaryUpdater {
    tx: mpsc::UnboundedSender<Job>,
}

impl SummaryUpdater {
    /// Spawn the worker that owns the three incremental summaries.
    #[must_use]
    pub fn spawn(store: Arc<dyn ObjectStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(store, rx));
        Self { tx }
    }

    /// Fold one completed run into the summaries. Resolves when the worker
    /// has processed this request; requests are processed strictly in
    /// submission order.
    pub async fn apply(&self, request: UpdateRequest) -> Result<()> {
        let (done, ready) = oneshot::channel();
        self.tx
            .send(Job { request, done })
            .map_err(|_| Error::Store("summary worker is gone".to_string()))?;
        ready
            .await
            .map_err(|_| Error::Store("summary worker dropped the request".to_string()))?
    }
}

async fn worker(store: Arc<dyn ObjectStore>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job { request, done }) = rx.recv().await {
        let config_id = request.config_id.clone();
        let outcome = apply_update(store.as_ref(), request).await;
        if let Err(e) = &outcome {
            error!(config_id = %config_id, error = %e, "incremental summary update failed");
        }
        // Receiver may have gone away; the update already happened.
        let _ = done.send(outcome);
    }
    debug!("summary worker shutting down");
}

/// Read a summary object, treating corrupt payloads as absent. A corrupt
/// summary must not wedge updates forever; the drain-time backfill
/// rewrites these objects from scratch.
async fn read_or_default<T: DeserializeOwned + Default>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<T> {
    match store::get_json::<T>(store, key).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(T::default()),
        Err(Error::CorruptArtifact { key, reason }) => {
            error!(key = %key, reason = %reason, "corrupt summary, rebuilding from empty");
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

fn canonical_timestamp(request: &UpdateRequest) -> Result<DateTime<Utc>> {
    if let Some(ts) = timestamp_from_result_filename(&request.file_name) {
        return Ok(ts);
    }
    // A result filename we cannot parse is an invariant violation; the
    // body timestamp is the only remaining anchor.
    warn!(
        file_name = %request.file_name,
        "result filename carries no parseable timestamp, falling back to body"
    );
    request.result.timestamp.ok_or_else(|| Error::CorruptArtifact {
        key: request.file_name.clone(),
        reason: "no timestamp in filename or body".to_string(),
    })
}

async fn apply_update(store: &dyn ObjectStore, request: UpdateRequest) -> Result<()> {
    let now = Utc::now();
    let timestamp = canonical_timestamp(&request)?;
    let lean = LeanRun::from_result(&request.result, timestamp);

    // Step 1: per-config summary.
    let per_config_key = keys::per_config_summary(&request.config_id);
    let existing = match store::get_json(store, &per_config_key).await {
        Ok(value) => value,
        Err(Error::CorruptArtifact { key, reason }) => {
            error!(key = %key, reason = %reason, "corrupt per-config summary, starting fresh");
            None
        }
        Err(e) => return Err(e),
    };
    let per_config = upsert_per_config(
        existing,
        &lean,
        request.result.description.clone(),
        now,
    );
    store::put_json(store, &per_config_key, &per_config).await?;

    // Step 2: fleet-wide summary.
    let mut fleet: FleetSummary = read_or_default(store, keys::FLEET_SUMMARY).await?;
    fleet.upsert(fleet_entry_of(&per_config), now);
    store::put_json(store, keys::FLEET_SUMMARY, &fleet).await?;

    // Step 3: latest-N summary.
    let mut latest: LatestRunsSummary = read_or_default(store, keys::LATEST_RUNS_SUMMARY).await?;
    latest.upsert(lean, now);
    store::put_json(store, keys::LATEST_RUNS_SUMMARY, &latest).await?;

    debug!(
        config_id = %request.config_id,
        run_label = %request.result.run_label,
        "incremental summaries updated"
    );
    Ok(())
}
