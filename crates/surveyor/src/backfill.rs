//! Drain-time lightweight backfill.
//!
//! Rebuilds the homepage, model, and demographic summaries (and
//! refreshes the fleet-wide and latest-N summaries) from the many small
//! per-config summaries, never from raw result artifacts. A per-config
//! summary is ~20 KB where a raw result is 50–500 KB; for a fleet of
//! ~1,500 blueprints that is the difference between ~30 MB and an OOM.
//!
//! Runs only while the queue gates dispatch (or via the explicit admin
//! command), so no incremental update can race the rebuild.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::BACKFILL_FETCH_CONCURRENCY;
use crate::error::{Error, Result};
use crate::models::base_model_id;
use crate::store::{self, keys, ObjectStore};
use crate::summaries::{
    dtef_survey_id, fleet_entry_of, ConfigScore, DriftIndicator, DtefSummary, FleetSummary,
    HeadlineStats, HomepageSummary, LatestRunsSummary, LeanRun, ModelSummary, PerConfigSummary,
    ScoreStats, TopicChampion, DRIFT_THRESHOLD,
};
use crate::tags;

/// Minimum samples before a model is eligible for a drift indicator.
const DRIFT_MIN_SAMPLES: usize = 4;

/// Counters describing one backfill execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Per-config summaries read.
    pub configs_read: usize,
    /// Per-config summaries that were missing or corrupt.
    pub configs_unreadable: usize,
    /// Lean runs collected across the fleet.
    pub runs_collected: usize,
    /// Model summaries written.
    pub model_summaries_written: usize,
    /// Demographic summaries written (per-survey plus combined).
    pub dtef_summaries_written: usize,
}

/// The lightweight aggregator. Holds only a store handle; all state is
/// read fresh on every execution.
pub struct LightweightBackfill {
    store: Arc<dyn ObjectStore>,
}

impl LightweightBackfill {
    /// Create a backfill bound to a store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Rebuild every aggregate artifact from the per-config summaries.
    ///
    /// # Errors
    ///
    /// Fails only when the summary listing or an aggregate write fails;
    /// individual unreadable per-config summaries are skipped and counted.
    pub async fn run(&self) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        let now = Utc::now();

        let listed = self
            .store
            .list_prefix(keys::PER_CONFIG_SUMMARY_PREFIX)
            .await?;
        let summary_keys: Vec<String> = listed
            .into_iter()
            .map(|meta| meta.key)
            .filter(|key| key.ends_with(".json"))
            .collect();
        debug!(count = summary_keys.len(), "backfill listing complete");

        let store = Arc::clone(&self.store);
        let fetched: Vec<(String, Result<Option<PerConfigSummary>>)> = stream::iter(summary_keys)
            .map(|key| {
                let store = Arc::clone(&store);
                async move {
                    let summary = store::get_json(store.as_ref(), &key).await;
                    (key, summary)
                }
            })
            .buffer_unordered(BACKFILL_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut summaries: Vec<PerConfigSummary> = Vec::new();
        for (key, outcome) in fetched {
            match outcome {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {
                    report.configs_unreadable += 1;
                    warn!(key = %key, "per-config summary vanished during backfill");
                }
                Err(e) => {
                    report.configs_unreadable += 1;
                    warn!(key = %key, error = %e, "unreadable per-config summary, skipping");
                }
            }
        }
        summaries.sort_by(|a, b| a.config_id.cmp(&b.config_id));
        report.configs_read = summaries.len();

        let all_runs: Vec<LeanRun> = summaries
            .iter()
            .flat_map(|s| s.runs.iter().cloned())
            .collect();
        report.runs_collected = all_runs.len();

        // Fleet-wide and latest-N refresh: idempotent rewrites of the
        // incremental baselines.
        let fleet = FleetSummary {
            configs: summaries.iter().map(fleet_entry_of).collect(),
            last_updated: Some(now),
        };
        store::put_json(self.store.as_ref(), keys::FLEET_SUMMARY, &fleet).await?;

        let latest = LatestRunsSummary::rebuild(all_runs.clone(), now);
        store::put_json(self.store.as_ref(), keys::LATEST_RUNS_SUMMARY, &latest).await?;

        // Homepage: blueprints tagged `_public_api` belong to the API
        // surface and stay out of the dashboard entirely.
        let dashboard: Vec<&PerConfigSummary> = summaries
            .iter()
            .filter(|s| !tags::is_public_api(&s.tags))
            .collect();
        let homepage = build_homepage(&dashboard, now);
        store::put_json(self.store.as_ref(), keys::HOMEPAGE_SUMMARY, &homepage).await?;

        // Per-model aggregates, one object per distinct base model.
        let model_summaries = build_model_summaries(&all_runs, now);
        for summary in &model_summaries {
            store::put_json(
                self.store.as_ref(),
                &keys::model_summary(&summary.base_model_id),
                summary,
            )
            .await?;
        }
        report.model_summaries_written = model_summaries.len();

        // Demographic summaries, only when any run carries the tag.
        let dtef_runs: Vec<&LeanRun> = all_runs
            .iter()
            .filter(|run| tags::is_dtef(&run.tags))
            .collect();
        if !dtef_runs.is_empty() {
            report.dtef_summaries_written = self.write_dtef_summaries(&dtef_runs, now).await?;
        }

        info!(
            configs = report.configs_read,
            runs = report.runs_collected,
            models = report.model_summaries_written,
            "backfill rebuilt aggregate summaries"
        );
        Ok(report)
    }

    /// Write per-survey summaries first, the combined one last. A
    /// per-survey failure is logged and skipped; every object has a single
    /// writer and the next drain rewrites them all.
    async fn write_dtef_summaries(
        &self,
        dtef_runs: &[&LeanRun],
        now: chrono::DateTime<Utc>,
    ) -> Result<usize> {
        let mut by_survey: BTreeMap<String, Vec<&LeanRun>> = BTreeMap::new();
        for run in dtef_runs {
            by_survey
                .entry(dtef_survey_id(&run.config_id))
                .or_default()
                .push(*run);
        }

        let mut written = 0;
        for (survey_id, runs) in &by_survey {
            let summary = build_dtef_summary(Some(survey_id.clone()), runs, now);
            match store::put_json(
                self.store.as_ref(),
                &keys::dtef_survey_summary(survey_id),
                &summary,
            )
            .await
            {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(survey_id = %survey_id, error = %e, "per-survey summary write failed");
                }
            }
        }

        let combined = build_dtef_summary(None, dtef_runs, now);
        store::put_json(self.store.as_ref(), keys::DTEF_SUMMARY, &combined).await?;
        Ok(written + 1)
    }
}

fn build_homepage(dashboard: &[&PerConfigSummary], now: chrono::DateTime<Utc>) -> HomepageSummary {
    let (featured, rest): (Vec<&PerConfigSummary>, Vec<&PerConfigSummary>) = dashboard
        .iter()
        .copied()
        .partition(|s| tags::is_featured(&s.tags));

    let runs: Vec<&LeanRun> = dashboard.iter().flat_map(|s| s.runs.iter()).collect();
    let run_means: Vec<f64> = runs
        .iter()
        .filter_map(|r| r.hybrid.as_ref().map(|h| h.mean))
        .collect();
    let generation_ms: Vec<u64> = runs
        .iter()
        .filter_map(|r| r.timing.as_ref().map(|t| t.generation_ms))
        .collect();

    let headline = HeadlineStats {
        total_configs: dashboard.len(),
        total_runs: dashboard.iter().map(|s| s.total_runs).sum(),
        overall: ScoreStats::from_scores(&run_means),
        mean_generation_ms: if generation_ms.is_empty() {
            None
        } else {
            Some(generation_ms.iter().sum::<u64>() / generation_ms.len() as u64)
        },
    };

    HomepageSummary {
        featured: featured.iter().map(|s| (*s).clone()).collect(),
        configs: rest.iter().map(|s| fleet_entry_of(s)).collect(),
        headline,
        drift: build_drift_indicators(&runs),
        topic_champions: build_topic_champions(&runs),
        last_updated: now,
    }
}

/// Compare each model's newer half of samples against its older half.
fn build_drift_indicators(runs: &[&LeanRun]) -> Vec<DriftIndicator> {
    let mut samples: BTreeMap<String, Vec<(chrono::DateTime<Utc>, f64)>> = BTreeMap::new();
    for run in runs {
        for (model, score) in &run.per_model_scores {
            samples
                .entry(base_model_id(model))
                .or_default()
                .push((run.timestamp, *score));
        }
    }

    let mut indicators = Vec::new();
    for (model, mut points) in samples {
        if points.len() < DRIFT_MIN_SAMPLES {
            continue;
        }
        points.sort_by_key(|(ts, _)| *ts);
        let midpoint = points.len() / 2;
        let prior_mean =
            points[..midpoint].iter().map(|(_, s)| s).sum::<f64>() / midpoint as f64;
        let recent_count = points.len() - midpoint;
        let recent_mean =
            points[midpoint..].iter().map(|(_, s)| s).sum::<f64>() / recent_count as f64;
        let delta = recent_mean - prior_mean;
        if delta.abs() >= DRIFT_THRESHOLD {
            indicators.push(DriftIndicator {
                model,
                recent_mean,
                prior_mean,
                delta,
                samples: points.len(),
            });
        }
    }
    indicators.sort_by(|a, b| {
        b.delta
            .abs()
            .partial_cmp(&a.delta.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indicators
}

/// Best mean score per non-reserved topic tag.
fn build_topic_champions(runs: &[&LeanRun]) -> Vec<TopicChampion> {
    let mut by_topic: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for run in runs {
        for tag in &run.tags {
            if tags::is_reserved(tag) || tag == tags::TAG_DTEF {
                continue;
            }
            let topic = by_topic.entry(tag.clone()).or_default();
            for (model, score) in &run.per_model_scores {
                topic.entry(base_model_id(model)).or_default().push(*score);
            }
        }
    }

    let mut champions = Vec::new();
    for (topic, models) in by_topic {
        let best = models
            .into_iter()
            .filter_map(|(model, scores)| {
                ScoreStats::from_scores(&scores).map(|stats| (model, stats))
            })
            .max_by(|(_, a), (_, b)| {
                a.mean
                    .partial_cmp(&b.mean)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some((model, stats)) = best {
            champions.push(TopicChampion {
                topic,
                model,
                mean_score: stats.mean,
                runs: stats.count,
            });
        }
    }
    champions
}

fn build_model_summaries(runs: &[LeanRun], now: chrono::DateTime<Utc>) -> Vec<ModelSummary> {
    // base model → (all samples, per-config samples, run count)
    struct Acc {
        samples: Vec<f64>,
        per_config: BTreeMap<String, Vec<f64>>,
        runs: usize,
    }
    let mut by_model: BTreeMap<String, Acc> = BTreeMap::new();
    for run in runs {
        for (model, score) in &run.per_model_scores {
            let acc = by_model.entry(base_model_id(model)).or_insert_with(|| Acc {
                samples: Vec::new(),
                per_config: BTreeMap::new(),
                runs: 0,
            });
            acc.samples.push(*score);
            acc.per_config
                .entry(run.config_id.clone())
                .or_default()
                .push(*score);
            acc.runs += 1;
        }
    }

    by_model
        .into_iter()
        .map(|(base_model_id, acc)| {
            let mut config_means: Vec<ConfigScore> = acc
                .per_config
                .iter()
                .map(|(config_id, scores)| ConfigScore {
                    config_id: config_id.clone(),
                    mean: scores.iter().sum::<f64>() / scores.len() as f64,
                })
                .collect();
            config_means.sort_by(|a, b| {
                b.mean
                    .partial_cmp(&a.mean)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            ModelSummary {
                base_model_id,
                overall: ScoreStats::from_scores(&acc.samples),
                best: config_means.first().cloned(),
                worst: config_means.last().cloned(),
                runs_tracked: acc.runs,
                last_updated: now,
            }
        })
        .collect()
}

fn build_dtef_summary(
    survey_id: Option<String>,
    runs: &[&LeanRun],
    now: chrono::DateTime<Utc>,
) -> DtefSummary {
    let mut config_ids: Vec<String> = runs.iter().map(|r| r.config_id.clone()).collect();
    config_ids.sort();
    config_ids.dedup();

    let means: Vec<f64> = runs
        .iter()
        .filter_map(|r| r.hybrid.as_ref().map(|h| h.mean))
        .collect();

    let mut model_scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for run in runs {
        for (model, score) in &run.per_model_scores {
            model_scores
                .entry(base_model_id(model))
                .or_default()
                .push(*score);
        }
    }
    let per_model = model_scores
        .into_iter()
        .filter_map(|(model, scores)| {
            ScoreStats::from_scores(&scores).map(|stats| (model, stats))
        })
        .collect();

    DtefSummary {
        survey_id,
        config_ids,
        overall: ScoreStats::from_scores(&means),
        per_model,
        last_updated: now,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::TimingInfo;
    use crate::store::MemoryObjectStore;
    use chrono::TimeZone;

    fn ts(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn lean(config_id: &str, label: &str, day: u32, model: &str, score: f64, tags: &[&str]) -> LeanRun {
        LeanRun {
            config_id: config_id.to_string(),
            title: config_id.to_string(),
            run_label: label.to_string(),
            timestamp: ts(day),
            tags: tags.iter().map(ToString::to_string).collect(),
            models: vec![model.to_string()],
            per_model_scores: BTreeMap::from([(model.to_string(), score)]),
            hybrid: Some(ScoreStats {
                mean: score,
                stddev: 0.0,
                count: 1,
            }),
            timing: Some(TimingInfo {
                generation_ms: 1000,
                evaluation_ms: 500,
                save_ms: 100,
                slowest_model: None,
                fastest_model: None,
            }),
        }
    }

    fn summary(config_id: &str, tags: &[&str], runs: Vec<LeanRun>) -> PerConfigSummary {
        let means: Vec<f64> = runs
            .iter()
            .filter_map(|r| r.hybrid.as_ref().map(|h| h.mean))
            .collect();
        PerConfigSummary {
            config_id: config_id.to_string(),
            title: config_id.to_string(),
            description: None,
            tags: tags.iter().map(ToString::to_string).collect(),
            total_runs: runs.len() as u64,
            overall: ScoreStats::from_scores(&means),
            runs,
            last_updated: ts(20),
        }
    }

    async fn seed(store: &MemoryObjectStore, summaries: &[PerConfigSummary]) {
        for s in summaries {
            store::put_json(store, &keys::per_config_summary(&s.config_id), s)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn rebuilds_fleet_latest_and_homepage() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[
                summary(
                    "health__one",
                    &["_periodic", "_featured", "health"],
                    vec![lean("health__one", "a", 1, "p:m/a", 0.8, &["_periodic", "health"])],
                ),
                summary(
                    "econ__two",
                    &["_periodic", "econ"],
                    vec![lean("econ__two", "b", 2, "p:m/b", 0.6, &["_periodic", "econ"])],
                ),
            ],
        )
        .await;

        let backfill = LightweightBackfill::new(Arc::new(store.clone()));
        let report = backfill.run().await.unwrap();
        assert_eq!(report.configs_read, 2);
        assert_eq!(report.runs_collected, 2);

        let fleet: FleetSummary = store::get_json(&store, keys::FLEET_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fleet.configs.len(), 2);

        let latest: LatestRunsSummary = store::get_json(&store, keys::LATEST_RUNS_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.runs.len(), 2);
        assert_eq!(latest.runs[0].run_label, "b");

        let homepage: HomepageSummary = store::get_json(&store, keys::HOMEPAGE_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(homepage.featured.len(), 1);
        assert_eq!(homepage.featured[0].config_id, "health__one");
        assert_eq!(homepage.configs.len(), 1);
        assert_eq!(homepage.headline.total_configs, 2);
        assert_eq!(homepage.headline.mean_generation_ms, Some(1000));
    }

    #[tokio::test]
    async fn public_api_configs_stay_off_the_homepage() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[
                summary(
                    "api__probe",
                    &["_periodic", "_public_api"],
                    vec![lean("api__probe", "a", 1, "p:m/a", 0.9, &["_public_api"])],
                ),
                summary(
                    "real__one",
                    &["_periodic"],
                    vec![lean("real__one", "b", 2, "p:m/a", 0.5, &["_periodic"])],
                ),
            ],
        )
        .await;

        let backfill = LightweightBackfill::new(Arc::new(store.clone()));
        backfill.run().await.unwrap();

        let homepage: HomepageSummary = store::get_json(&store, keys::HOMEPAGE_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(homepage.headline.total_configs, 1);
        assert!((homepage.headline.overall.as_ref().unwrap().mean - 0.5).abs() < 1e-12);
        // The fleet summary still carries everything.
        let fleet: FleetSummary = store::get_json(&store, keys::FLEET_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fleet.configs.len(), 2);
    }

    #[tokio::test]
    async fn writes_model_summaries_per_base_model() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[summary(
                "x__one",
                &["_periodic"],
                vec![
                    lean("x__one", "a", 1, "openrouter:openai/gpt-4o", 0.9, &["_periodic"]),
                    lean("x__one", "b", 2, "anthropic:claude-sonnet", 0.7, &["_periodic"]),
                ],
            )],
        )
        .await;

        let backfill = LightweightBackfill::new(Arc::new(store.clone()));
        let report = backfill.run().await.unwrap();
        assert_eq!(report.model_summaries_written, 2);

        let model: ModelSummary =
            store::get_json(&store, &keys::model_summary("openai/gpt-4o"))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(model.runs_tracked, 1);
        assert_eq!(model.best.as_ref().unwrap().config_id, "x__one");
    }

    #[tokio::test]
    async fn dtef_summaries_written_only_when_tagged_runs_exist() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[summary(
                "plain__one",
                &["_periodic"],
                vec![lean("plain__one", "a", 1, "p:m/a", 0.5, &["_periodic"])],
            )],
        )
        .await;
        let backfill = LightweightBackfill::new(Arc::new(store.clone()));
        let report = backfill.run().await.unwrap();
        assert_eq!(report.dtef_summaries_written, 0);
        assert!(store.get(keys::DTEF_SUMMARY).await.unwrap().is_none());

        seed(
            &store,
            &[summary(
                "dtef__gss__trust",
                &["_periodic", "dtef"],
                vec![lean(
                    "dtef__gss__trust",
                    "b",
                    2,
                    "p:m/a",
                    0.6,
                    &["_periodic", "dtef"],
                )],
            )],
        )
        .await;
        let report = backfill.run().await.unwrap();
        // One per-survey summary plus the combined one.
        assert_eq!(report.dtef_summaries_written, 2);

        let combined: DtefSummary = store::get_json(&store, keys::DTEF_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(combined.survey_id, None);
        assert_eq!(combined.config_ids, vec!["dtef__gss__trust"]);

        let per_survey: DtefSummary =
            store::get_json(&store, &keys::dtef_survey_summary("gss"))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(per_survey.survey_id.as_deref(), Some("gss"));
    }

    #[tokio::test]
    async fn repeated_backfill_is_a_no_op_beyond_last_updated() {
        let store = MemoryObjectStore::new();
        seed(
            &store,
            &[summary(
                "x__one",
                &["_periodic", "_featured"],
                vec![lean("x__one", "a", 1, "p:m/a", 0.8, &["_periodic"])],
            )],
        )
        .await;
        let backfill = LightweightBackfill::new(Arc::new(store.clone()));
        backfill.run().await.unwrap();
        let first: HomepageSummary = store::get_json(&store, keys::HOMEPAGE_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        backfill.run().await.unwrap();
        let second: HomepageSummary = store::get_json(&store, keys::HOMEPAGE_SUMMARY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.featured, second.featured);
        assert_eq!(first.configs, second.configs);
        assert_eq!(first.headline, second.headline);
        assert_eq!(first.drift, second.drift);
        assert_eq!(first.topic_champions, second.topic_champions);
    }

    #[test]
    fn drift_indicator_requires_movement() {
        let steady: Vec<LeanRun> = (1..=6)
            .map(|d| lean("x", &format!("l{d}"), d, "p:m/a", 0.8, &[]))
            .collect();
        let refs: Vec<&LeanRun> = steady.iter().collect();
        assert!(build_drift_indicators(&refs).is_empty());

        let drifting: Vec<LeanRun> = (1..=6)
            .map(|d| {
                let score = if d <= 3 { 0.8 } else { 0.6 };
                lean("x", &format!("l{d}"), d, "p:m/a", score, &[])
            })
            .collect();
        let refs: Vec<&LeanRun> = drifting.iter().collect();
        let indicators = build_drift_indicators(&refs);
        assert_eq!(indicators.len(), 1);
        assert!(indicators[0].delta < -0.1);
    }

    #[test]
    fn topic_champions_skip_reserved_tags() {
        let runs = [
            lean("x", "a", 1, "p:m/a", 0.9, &["health", "_periodic"]),
            lean("y", "b", 2, "p:m/b", 0.4, &["health"]),
        ];
        let refs: Vec<&LeanRun> = runs.iter().collect();
        let champions = build_topic_champions(&refs);
        assert_eq!(champions.len(), 1);
        assert_eq!(champions[0].topic, "health");
        assert_eq!(champions[0].model, "m/a");
    }
}
