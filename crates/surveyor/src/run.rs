//! Run result artifacts.
//!
//! A run is one completed pipeline invocation for one blueprint. The
//! pipeline owns the artifact file; this module models its shape, the
//! filename convention, and the per-run score roll-ups the summaries are
//! built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::timestamp::encode_safe_timestamp;

/// One point-function assessment for a single model/prompt cell. These
/// arrays dominate artifact size and are stripped from all lean encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointAssessment {
    /// Point-function name.
    pub function: String,
    /// Score in [0, 1].
    pub score: f64,
    /// Function-provided explanation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub explain: Option<String>,
}

/// Coverage result for one model/prompt cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageScore {
    /// Combined cell score in [0, 1].
    pub score: f64,
    /// Per-point assessments (stripped in lean encodings).
    #[serde(default)]
    pub point_assessments: Vec<PointAssessment>,
}

/// Timing breakdown for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// Generation phase duration in milliseconds.
    pub generation_ms: u64,
    /// Evaluation phase duration in milliseconds.
    pub evaluation_ms: u64,
    /// Save phase duration in milliseconds.
    pub save_ms: u64,
    /// Slowest model in the generation phase.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub slowest_model: Option<String>,
    /// Fastest model in the generation phase.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fastest_model: Option<String>,
}

/// A raw result artifact as written by the pipeline runner.
///
/// The body's `timestamp` is advisory: the filename-derived timestamp is
/// canonical everywhere downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Blueprint id this run evaluated.
    pub config_id: String,
    /// Content hash of the resolved blueprint.
    pub run_label: String,
    /// Advisory timestamp; superseded by the filename.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Blueprint title at run time.
    pub config_title: String,
    /// Blueprint description at run time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// Normalised blueprint tags at run time.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Concrete models the pipeline actually executed.
    pub effective_models: Vec<String>,
    /// Prompt ids actually executed.
    #[serde(default)]
    pub prompt_ids: Vec<String>,
    /// model id → prompt id → coverage.
    #[serde(default)]
    pub coverage: BTreeMap<String, BTreeMap<String, CoverageScore>>,
    /// Optional timing breakdown.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timing: Option<TimingInfo>,
    /// Source-repo commit the blueprint was read at.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_sha: Option<String>,
}

impl RunResult {
    /// Mean hybrid score per model (mean of that model's cell scores).
    #[must_use]
    pub fn per_model_scores(&self) -> BTreeMap<String, f64> {
        self.coverage
            .iter()
            .filter_map(|(model, cells)| {
                if cells.is_empty() {
                    return None;
                }
                let sum: f64 = cells.values().map(|c| c.score).sum();
                Some((model.clone(), sum / cells.len() as f64))
            })
            .collect()
    }

    /// Mean and standard deviation of the hybrid score over all
    /// model/prompt cells.
    #[must_use]
    pub fn hybrid_stats(&self) -> Option<(f64, f64)> {
        let scores: Vec<f64> = self
            .coverage
            .values()
            .flat_map(|cells| cells.values().map(|c| c.score))
            .collect();
        if scores.is_empty() {
            return None;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance =
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        Some((mean, variance.sqrt()))
    }
}

/// Compose the canonical result artifact filename:
/// `<runLabel>_<safeTimestamp>_comparison.json`.
#[must_use]
pub fn result_file_name(run_label: &str, timestamp: DateTime<Utc>) -> String {
    format!("{run_label}_{}_comparison.json", encode_safe_timestamp(timestamp))
}

/// Extract the run label from a result artifact filename.
#[must_use]
pub fn run_label_from_file_name(file_name: &str) -> Option<String> {
    let base = file_name.rsplit('/').next()?;
    let (label, _) = base.split_once('_')?;
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::timestamp_from_result_filename;
    use chrono::TimeZone;

    fn cell(score: f64) -> CoverageScore {
        CoverageScore {
            score,
            point_assessments: vec![PointAssessment {
                function: "expected_distribution".to_string(),
                score,
                explain: None,
            }],
        }
    }

    fn result() -> RunResult {
        let mut coverage = BTreeMap::new();
        coverage.insert(
            "openai/gpt-4o".to_string(),
            BTreeMap::from([("p1".to_string(), cell(0.8)), ("p2".to_string(), cell(0.6))]),
        );
        coverage.insert(
            "anthropic/claude".to_string(),
            BTreeMap::from([("p1".to_string(), cell(1.0)), ("p2".to_string(), cell(0.6))]),
        );
        RunResult {
            config_id: "topic__one".to_string(),
            run_label: "abcdef0123456789".to_string(),
            timestamp: None,
            config_title: "One".to_string(),
            description: None,
            tags: vec!["_periodic".to_string()],
            effective_models: vec!["openai/gpt-4o".to_string(), "anthropic/claude".to_string()],
            prompt_ids: vec!["p1".to_string(), "p2".to_string()],
            coverage,
            timing: None,
            commit_sha: Some("deadbeef".to_string()),
        }
    }

    #[test]
    fn per_model_scores_are_cell_means() {
        let scores = result().per_model_scores();
        assert!((scores["openai/gpt-4o"] - 0.7).abs() < 1e-12);
        assert!((scores["anthropic/claude"] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn hybrid_stats_cover_all_cells() {
        let (mean, stddev) = result().hybrid_stats().unwrap();
        assert!((mean - 0.75).abs() < 1e-12);
        assert!(stddev > 0.0);
    }

    #[test]
    fn empty_coverage_has_no_stats() {
        let mut r = result();
        r.coverage.clear();
        assert!(r.hybrid_stats().is_none());
        assert!(r.per_model_scores().is_empty());
    }

    #[test]
    fn file_name_round_trips_label_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let name = result_file_name("abcdef0123456789", ts);
        assert_eq!(run_label_from_file_name(&name).unwrap(), "abcdef0123456789");
        assert_eq!(timestamp_from_result_filename(&name), Some(ts));
    }
}
