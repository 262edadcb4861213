//! Object-store abstraction and the live key layout.
//!
//! The orchestrator treats storage as a flat key/value namespace with
//! prefix listing. No transactions and no conditional writes are assumed;
//! every artifact has exactly one writer (pipeline results are written by
//! the runner, the three incremental summaries by the updater, the
//! homepage and model summaries by the drain-time backfill).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// JSON content type used for every summary artifact.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Metadata for one listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Last-modified instant reported by the store.
    pub last_modified: Option<DateTime<Utc>>,
    /// Object size in bytes.
    pub size: u64,
}

/// Flat key/value storage consumed by the orchestrator.
///
/// Implementations paginate `list_prefix` internally and return the full
/// result set; callers never see continuation tokens.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write an object.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    /// List all objects under a prefix.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// Key layout for every artifact class, kept in one place so readers and
/// writers can never drift apart.
pub mod keys {
    /// Per-config summary.
    #[must_use]
    pub fn per_config_summary(config_id: &str) -> String {
        format!("live/summaries/{config_id}.json")
    }

    /// Prefix under which every per-config summary lives.
    pub const PER_CONFIG_SUMMARY_PREFIX: &str = "live/summaries/";

    /// Prefix of raw result artifacts for one blueprint.
    #[must_use]
    pub fn result_prefix(config_id: &str) -> String {
        format!("live/blueprints/{config_id}/")
    }

    /// Raw result artifact.
    #[must_use]
    pub fn result_artifact(config_id: &str, file_name: &str) -> String {
        format!("live/blueprints/{config_id}/{file_name}")
    }

    /// Fleet-wide summary (one entry per known blueprint).
    pub const FLEET_SUMMARY: &str = "live/aggregates/all_blueprints_summary.json";

    /// Most-recent-N summary across the whole fleet.
    pub const LATEST_RUNS_SUMMARY: &str = "live/aggregates/latest_runs_summary.json";

    /// Homepage / dashboard hybrid summary.
    pub const HOMEPAGE_SUMMARY: &str = "live/aggregates/homepage_summary.json";

    /// Combined demographic-survey summary.
    pub const DTEF_SUMMARY: &str = "live/aggregates/dtef_summary.json";

    /// Per-survey demographic summary.
    #[must_use]
    pub fn dtef_survey_summary(survey_id: &str) -> String {
        format!("live/aggregates/dtef_summary_{survey_id}.json")
    }

    /// Per-model summary.
    #[must_use]
    pub fn model_summary(base_model_id: &str) -> String {
        // Model ids contain `/` and `:`; flatten to a single path segment.
        let safe = base_model_id.replace(['/', ':'], "_");
        format!("live/models/summaries/{safe}.json")
    }
}

/// Read and decode a JSON artifact. Corrupt payloads are reported as
/// [`Error::CorruptArtifact`]; callers decide whether that is fatal.
pub async fn get_json<T: DeserializeOwned>(store: &dyn ObjectStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::CorruptArtifact {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Encode and write a JSON artifact.
pub async fn put_json<T: Serialize>(store: &dyn ObjectStore, key: &str, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    store.put(key, Bytes::from(body), CONTENT_TYPE_JSON).await
}

/// In-memory object store used in tests and single-process local runs.
#[derive(Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.read().get(key).map(|(body, _)| body.clone()))
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<()> {
        self.objects
            .write()
            .insert(key.to_string(), (body, Utc::now()));
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (body, modified))| ObjectMeta {
                key: key.clone(),
                last_modified: Some(*modified),
                size: body.len() as u64,
            })
            .collect())
    }
}
