//! Summary artifact types and their pure merge transforms.
//!
//! Three small incremental summaries are kept current after every run
//! (per-config, fleet-wide, latest-N); the heavier homepage, model, and
//! demographic summaries are rebuilt only at drain time. All merge logic
//! here is pure so the updater and backfill can share it and the
//! idempotence laws can be tested without a store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{LATEST_RUNS_CAP, PER_CONFIG_RUNS_CAP};
use crate::run::{RunResult, TimingInfo};
use crate::tags;

/// Minimum absolute score movement before a model shows up as drifting.
pub const DRIFT_THRESHOLD: f64 = 0.05;

/// Mean / standard deviation / sample count for a score population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Number of samples.
    pub count: usize,
}

impl ScoreStats {
    /// Compute stats over a score slice; `None` when empty.
    #[must_use]
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance =
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        Some(Self {
            mean,
            stddev: variance.sqrt(),
            count: scores.len(),
        })
    }
}

/// A lean run record: coverage scores retained, per-point assessment
/// arrays stripped. This is the currency of every aggregate artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeanRun {
    /// Blueprint id.
    pub config_id: String,
    /// Blueprint title at run time.
    pub title: String,
    /// Content hash of the resolved blueprint.
    pub run_label: String,
    /// Canonical (filename-derived) timestamp.
    pub timestamp: DateTime<Utc>,
    /// Normalised tags at run time.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Concrete models executed.
    #[serde(default)]
    pub models: Vec<String>,
    /// model id → mean hybrid score for that model.
    #[serde(default)]
    pub per_model_scores: BTreeMap<String, f64>,
    /// Hybrid score stats over all model/prompt cells.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hybrid: Option<ScoreStats>,
    /// Timing breakdown, when the pipeline recorded one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timing: Option<TimingInfo>,
}

impl LeanRun {
    /// Build a lean record from a raw result. `canonical_timestamp` comes
    /// from the artifact filename and supersedes the body timestamp.
    #[must_use]
    pub fn from_result(result: &RunResult, canonical_timestamp: DateTime<Utc>) -> Self {
        let hybrid = result
            .hybrid_stats()
            .map(|(mean, stddev)| ScoreStats {
                mean,
                stddev,
                count: result.coverage.values().map(BTreeMap::len).sum(),
            });
        Self {
            config_id: result.config_id.clone(),
            title: result.config_title.clone(),
            run_label: result.run_label.clone(),
            timestamp: canonical_timestamp,
            tags: tags::normalize_tags(&result.tags),
            models: result.effective_models.clone(),
            per_model_scores: result.per_model_scores(),
            hybrid,
            timing: result.timing.clone(),
        }
    }

    /// The dedup identity of a run entry.
    #[must_use]
    pub fn identity(&self) -> (&str, &str, DateTime<Utc>) {
        (&self.config_id, &self.run_label, self.timestamp)
    }

    /// Headline form: hybrid stats kept, per-model coverage dropped.
    #[must_use]
    pub fn headline(&self) -> RunHeadline {
        RunHeadline {
            run_label: self.run_label.clone(),
            timestamp: self.timestamp,
            models: self.models.clone(),
            hybrid: self.hybrid.clone(),
            timing: self.timing.clone(),
        }
    }
}

/// The single most recent run of a blueprint, stripped of coverage detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHeadline {
    /// Content hash of the resolved blueprint.
    pub run_label: String,
    /// Canonical timestamp.
    pub timestamp: DateTime<Utc>,
    /// Concrete models executed.
    #[serde(default)]
    pub models: Vec<String>,
    /// Hybrid score stats.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hybrid: Option<ScoreStats>,
    /// Timing breakdown.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timing: Option<TimingInfo>,
}

/// Per-config summary: the compact digest of all runs for one blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerConfigSummary {
    /// Blueprint id.
    pub config_id: String,
    /// Blueprint title.
    pub title: String,
    /// Blueprint description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Normalised tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Recent runs, newest first, capped.
    pub runs: Vec<LeanRun>,
    /// Mean/stddev of the hybrid score over retained runs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overall: Option<ScoreStats>,
    /// Total runs ever observed (including ones aged out of `runs`).
    pub total_runs: u64,
    /// Instant of the last update.
    pub last_updated: DateTime<Utc>,
}

impl PerConfigSummary {
    fn empty(run: &LeanRun, description: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            config_id: run.config_id.clone(),
            title: run.title.clone(),
            description,
            tags: run.tags.clone(),
            runs: Vec::new(),
            overall: None,
            total_runs: 0,
            last_updated: now,
        }
    }
}

/// Merge a new run into a per-config summary.
///
/// Idempotent: merging the same `(run_label, timestamp)` twice replaces the
/// entry rather than duplicating it and leaves `total_runs` unchanged.
#[must_use]
pub fn upsert_per_config(
    existing: Option<PerConfigSummary>,
    run: &LeanRun,
    description: Option<String>,
    now: DateTime<Utc>,
) -> PerConfigSummary {
    let mut summary =
        existing.unwrap_or_else(|| PerConfigSummary::empty(run, description.clone(), now));

    let before = summary.runs.len();
    summary
        .runs
        .retain(|r| (r.run_label.as_str(), r.timestamp) != (run.run_label.as_str(), run.timestamp));
    let replaced = summary.runs.len() != before;

    summary.runs.insert(0, run.clone());
    summary.runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    summary.runs.truncate(PER_CONFIG_RUNS_CAP);

    let means: Vec<f64> = summary
        .runs
        .iter()
        .filter_map(|r| r.hybrid.as_ref().map(|h| h.mean))
        .collect();
    summary.overall = ScoreStats::from_scores(&means);

    if !replaced {
        summary.total_runs += 1;
    }

    // Run-time metadata wins over whatever an older run wrote.
    summary.title = run.title.clone();
    summary.tags = run.tags.clone();
    if description.is_some() {
        summary.description = description;
    }
    summary.last_updated = now;
    summary
}

/// One blueprint's entry in the fleet-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEntry {
    /// Blueprint id.
    pub config_id: String,
    /// Blueprint title.
    pub title: String,
    /// Blueprint description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Normalised tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Latest run, stripped of coverage detail.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latest_run: Option<RunHeadline>,
    /// Total-run-count hint.
    pub total_runs: u64,
}

/// Fleet-wide summary: one entry per known blueprint. The catalogue source
/// for every downstream listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    /// Entries, one per blueprint.
    pub configs: Vec<FleetEntry>,
    /// Instant of the last update.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl FleetSummary {
    /// Replace-or-append the entry for a blueprint; updates `last_updated`.
    pub fn upsert(&mut self, entry: FleetEntry, now: DateTime<Utc>) {
        match self.configs.iter_mut().find(|e| e.config_id == entry.config_id) {
            Some(slot) => *slot = entry,
            None => self.configs.push(entry),
        }
        self.last_updated = Some(now);
    }
}

/// Build the fleet entry for a blueprint out of its per-config summary.
#[must_use]
pub fn fleet_entry_of(summary: &PerConfigSummary) -> FleetEntry {
    FleetEntry {
        config_id: summary.config_id.clone(),
        title: summary.title.clone(),
        description: summary.description.clone(),
        tags: summary.tags.clone(),
        latest_run: summary.runs.first().map(LeanRun::headline),
        total_runs: summary.total_runs,
    }
}

/// Bounded FIFO of the most recent runs across the whole fleet.
///
/// Invariants: strictly descending by timestamp, no duplicate
/// `(config_id, run_label, timestamp)` triples, length ≤ the cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestRunsSummary {
    /// Lean run entries, newest first.
    pub runs: Vec<LeanRun>,
    /// Instant of the last update.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LatestRunsSummary {
    /// Insert a run, deduplicating on identity and enforcing order/cap.
    pub fn upsert(&mut self, run: LeanRun, now: DateTime<Utc>) {
        self.runs.retain(|r| r.identity() != run.identity());
        self.runs.insert(0, run);
        self.runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.runs.truncate(LATEST_RUNS_CAP);
        self.last_updated = Some(now);
    }

    /// Rebuild from an arbitrary run collection (backfill path).
    #[must_use]
    pub fn rebuild(mut runs: Vec<LeanRun>, now: DateTime<Utc>) -> Self {
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let mut deduped: Vec<LeanRun> = Vec::new();
        for run in runs {
            if !deduped.iter().any(|r| r.identity() == run.identity()) {
                deduped.push(run);
            }
            if deduped.len() == LATEST_RUNS_CAP {
                break;
            }
        }
        Self {
            runs: deduped,
            last_updated: Some(now),
        }
    }
}

/// Headline statistics for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineStats {
    /// Number of known blueprints.
    pub total_configs: usize,
    /// Total runs tracked across all per-config summaries.
    pub total_runs: u64,
    /// Hybrid score stats over every retained run.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overall: Option<ScoreStats>,
    /// Mean generation-phase duration over runs that reported timing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mean_generation_ms: Option<u64>,
}

/// A model whose recent scores moved away from its older baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftIndicator {
    /// Base model id.
    pub model: String,
    /// Mean over the newer half of its runs.
    pub recent_mean: f64,
    /// Mean over the older half of its runs.
    pub prior_mean: f64,
    /// `recent_mean - prior_mean`.
    pub delta: f64,
    /// Sample count feeding the comparison.
    pub samples: usize,
}

/// Best-performing model for one topic tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicChampion {
    /// Topic (a non-reserved tag).
    pub topic: String,
    /// Base model id of the champion.
    pub model: String,
    /// Its mean hybrid score on the topic.
    pub mean_score: f64,
    /// Runs backing the mean.
    pub runs: usize,
}

/// Homepage / dashboard hybrid summary. Full recent-run detail for
/// featured blueprints, metadata only for the rest. Rebuilt only at drain
/// time, never per-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomepageSummary {
    /// Full per-config summaries for blueprints tagged `_featured`.
    pub featured: Vec<PerConfigSummary>,
    /// Metadata-only entries for every other blueprint.
    pub configs: Vec<FleetEntry>,
    /// Headline statistics.
    pub headline: HeadlineStats,
    /// Potential model drift indicators.
    #[serde(default)]
    pub drift: Vec<DriftIndicator>,
    /// Topic champions.
    #[serde(default)]
    pub topic_champions: Vec<TopicChampion>,
    /// Instant of the rebuild.
    pub last_updated: DateTime<Utc>,
}

/// Mean score for one blueprint inside a model summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigScore {
    /// Blueprint id.
    pub config_id: String,
    /// Mean hybrid score of this model on this blueprint.
    pub mean: f64,
}

/// Per-model aggregate across all runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Base model id (provider routing stripped).
    pub base_model_id: String,
    /// Stats over every score this model produced.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overall: Option<ScoreStats>,
    /// Best blueprint for this model.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub best: Option<ConfigScore>,
    /// Worst blueprint for this model.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub worst: Option<ConfigScore>,
    /// Runs contributing samples.
    pub runs_tracked: usize,
    /// Instant of the rebuild.
    pub last_updated: DateTime<Utc>,
}

/// Demographic-survey summary, combined or per-survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtefSummary {
    /// Survey id; `None` for the combined summary.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub survey_id: Option<String>,
    /// Blueprint ids contributing runs.
    pub config_ids: Vec<String>,
    /// Stats over all contributing runs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub overall: Option<ScoreStats>,
    /// Per-base-model stats.
    #[serde(default)]
    pub per_model: BTreeMap<String, ScoreStats>,
    /// Instant of the rebuild.
    pub last_updated: DateTime<Utc>,
}

/// Derive the survey id of a DTEF blueprint from its config id: the first
/// `__` segment that is not the literal `dtef`, falling back to `general`.
#[must_use]
pub fn dtef_survey_id(config_id: &str) -> String {
    config_id
        .split("__")
        .find(|segment| !segment.is_empty() && *segment != tags::TAG_DTEF)
        .unwrap_or("general")
        .to_string()
}
