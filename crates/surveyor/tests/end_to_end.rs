//! End-to-end orchestration: tick → evaluate → incremental summaries →
//! drain → backfill → continuation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use surveyor::run::result_file_name;
use surveyor::store::{self, keys};
use surveyor::summaries::{FleetSummary, HomepageSummary, LatestRunsSummary, PerConfigSummary};
use surveyor::{
    ConfigSource, CoverageScore, EvalQueue, LightweightBackfill, MemoryObjectStore, ObjectStore,
    PipelineRequest, PipelineRunner, Result, RunResult, Scheduler, SchedulerConfig,
    SummaryUpdater, TickOptions, TreeEntry,
};

struct StaticSource {
    files: HashMap<String, String>,
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn list_tree(&self) -> Result<Vec<TreeEntry>> {
        Ok(self
            .files
            .keys()
            .map(|path| TreeEntry {
                path: path.clone(),
                size: None,
            })
            .collect())
    }

    async fn fetch_file(&self, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| surveyor::Error::Source(format!("no such file: {path}")))
    }

    async fn latest_commit(&self) -> Result<String> {
        Ok("e2e-commit".to_string())
    }
}

/// Pipeline stand-in that writes a small but realistic artifact.
struct WritingRunner {
    store: MemoryObjectStore,
    executions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PipelineRunner for WritingRunner {
    async fn execute(&self, request: PipelineRequest) -> Result<String> {
        self.executions.lock().push(request.blueprint.id.clone());
        let now = Utc::now();
        let file_name = result_file_name(&request.run_label, now);
        let mut coverage = BTreeMap::new();
        for (i, model) in request.blueprint.models.iter().enumerate() {
            coverage.insert(
                model.clone(),
                BTreeMap::from([(
                    "p1".to_string(),
                    CoverageScore {
                        score: 0.9 - 0.1 * i as f64,
                        point_assessments: vec![],
                    },
                )]),
            );
        }
        let result = RunResult {
            config_id: request.blueprint.id.clone(),
            run_label: request.run_label.clone(),
            timestamp: Some(now),
            config_title: request.blueprint.title.clone(),
            description: request.blueprint.description.clone(),
            tags: request.blueprint.tags.clone(),
            effective_models: request.blueprint.models.clone(),
            prompt_ids: vec!["p1".to_string()],
            coverage,
            timing: None,
            commit_sha: request.commit_sha.clone(),
        };
        store::put_json(
            &self.store,
            &keys::result_artifact(&request.blueprint.id, &file_name),
            &result,
        )
        .await?;
        Ok(file_name)
    }
}

fn blueprint_files() -> HashMap<String, String> {
    let mut files = HashMap::new();
    files.insert(
        "blueprints/health/clinical.yaml".to_string(),
        "title: Clinical\ntags: [_periodic, _featured, health]\nmodels: [CORE]\n".to_string(),
    );
    files.insert(
        "blueprints/econ/inflation.yaml".to_string(),
        "title: Inflation\ntags: [_periodic, econ]\nmodels: [CORE]\n".to_string(),
    );
    files.insert(
        "blueprints/manual/oneoff.yaml".to_string(),
        "title: Manual only\ntags: [adhoc]\n".to_string(),
    );
    files.insert(
        "models/model_catalog.json".to_string(),
        r#"{"groups": {"CORE": ["openrouter:openai/gpt-4o", "anthropic:claude-sonnet"]}}"#
            .to_string(),
    );
    files
}

async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn full_cycle_through_drain_and_continuation() {
    let store = MemoryObjectStore::new();
    let executions = Arc::new(Mutex::new(Vec::new()));
    let updater = SummaryUpdater::spawn(Arc::new(store.clone()));
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(StaticSource {
            files: blueprint_files(),
        }),
        Arc::new(store.clone()),
        Arc::new(WritingRunner {
            store: store.clone(),
            executions: Arc::clone(&executions),
        }),
        updater,
        SchedulerConfig::default(),
    ));

    let continuations = Arc::new(AtomicUsize::new(0));
    let backfill_store: Arc<dyn surveyor::ObjectStore> = Arc::new(store.clone());
    let continuations_hook = Arc::clone(&continuations);
    let queue = EvalQueue::builder()
        .on_backfill(Arc::new(move || {
            let store: Arc<dyn surveyor::ObjectStore> = Arc::clone(&backfill_store);
            let backfill = LightweightBackfill::new(store);
            Box::pin(async move { backfill.run().await.map(|_| ()) })
        }))
        .on_drained(Arc::new(move || {
            let continuations = Arc::clone(&continuations_hook);
            Box::pin(async move {
                continuations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .build();

    let report = scheduler
        .tick(&queue, TickOptions::default())
        .await
        .expect("tick");
    assert_eq!(report.discovered, 3);
    assert_eq!(report.scheduled, 2);
    assert_eq!(report.skipped_not_periodic, 1);

    // Let both evaluations run and their incremental updates land.
    settle().await;
    assert_eq!(executions.lock().len(), 2);

    let per_config: PerConfigSummary =
        store::get_json(&store, &keys::per_config_summary("health__clinical"))
            .await
            .expect("read")
            .expect("present");
    assert_eq!(per_config.runs.len(), 1);
    assert_eq!(per_config.runs[0].models.len(), 2);

    let fleet: FleetSummary = store::get_json(&store, keys::FLEET_SUMMARY)
        .await
        .expect("read")
        .expect("present");
    assert_eq!(fleet.configs.len(), 2);

    let latest: LatestRunsSummary = store::get_json(&store, keys::LATEST_RUNS_SUMMARY)
        .await
        .expect("read")
        .expect("present");
    assert_eq!(latest.runs.len(), 2);

    // Homepage does not exist yet: it is backfill-owned.
    assert!(store.get(keys::HOMEPAGE_SUMMARY).await.expect("get").is_none());

    // Idle for the quiet period: drain runs backfill, then continuation.
    tokio::time::sleep(Duration::from_secs(16)).await;
    settle().await;

    let homepage: HomepageSummary = store::get_json(&store, keys::HOMEPAGE_SUMMARY)
        .await
        .expect("read")
        .expect("present");
    assert_eq!(homepage.featured.len(), 1);
    assert_eq!(homepage.featured[0].config_id, "health__clinical");
    assert_eq!(homepage.configs.len(), 1);
    assert_eq!(continuations.load(Ordering::SeqCst), 1);

    let stats = queue.stats();
    assert_eq!(stats.total_completed, 2);
    assert_eq!(stats.total_failed, 0);
    assert_eq!(stats.total_backfills, 1);

    // A second tick sees two fresh runs and schedules nothing.
    let report = scheduler
        .tick(&queue, TickOptions::default())
        .await
        .expect("tick");
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.skipped_fresh, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_pipeline_is_counted_and_rescheduled_next_tick() {
    struct FailingRunner;

    #[async_trait]
    impl PipelineRunner for FailingRunner {
        async fn execute(&self, request: PipelineRequest) -> Result<String> {
            Err(surveyor::Error::Pipeline {
                config_id: request.blueprint.id,
                reason: "model provider 500".to_string(),
            })
        }
    }

    let store = MemoryObjectStore::new();
    let updater = SummaryUpdater::spawn(Arc::new(store.clone()));
    let scheduler = Scheduler::new(
        Arc::new(StaticSource {
            files: blueprint_files(),
        }),
        Arc::new(store.clone()),
        Arc::new(FailingRunner),
        updater,
        SchedulerConfig::default(),
    );
    let queue = EvalQueue::builder().build();

    scheduler
        .tick(&queue, TickOptions::default())
        .await
        .expect("tick");
    settle().await;

    let stats = queue.stats();
    assert_eq!(stats.total_failed, 2);
    assert_eq!(stats.total_completed, 0);

    // No artifacts were written, so the next tick observes no prior runs
    // and schedules again.
    let report = scheduler
        .tick(&queue, TickOptions::default())
        .await
        .expect("tick");
    assert_eq!(report.scheduled, 2);
}
