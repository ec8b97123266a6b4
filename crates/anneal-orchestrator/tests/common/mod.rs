#![allow(dead_code)]

use anneal_core::{
    AvailableResources, DatasetProfile, ModelCatalog, StaticDatasetProvider, StaticResources,
    TokenLengthStats, TrainingConfig,
};
use anneal_orchestrator::{
    JobId, JobStore, MockEngine, Orchestrator, SchedulerConfig, TrainingJob,
};
use std::sync::Arc;
use std::time::Duration;

pub const PROJECT: &str = "proj-1";
pub const SMALL_DATASET: &str = "ds-small";
pub const MODEL: &str = "tinyllama-1.1b";

/// 64 rows with the small config below gives 12 total steps per job.
pub fn small_profile() -> DatasetProfile {
    DatasetProfile {
        row_count: 64,
        column_schema: vec!["prompt".to_string(), "response".to_string()],
        token_lengths: TokenLengthStats { mean: 120.0, p95: 200, max: 400 },
    }
}

/// Valid config for [`MODEL`] whose warmup/save cadence fits 12 steps.
pub fn small_config() -> TrainingConfig {
    TrainingConfig { warmup_steps: 0, save_steps: 5, ..TrainingConfig::default() }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub engine: Arc<MockEngine>,
    pub store: Arc<JobStore>,
}

/// Wires an orchestrator around a builtin catalog, one small dataset, a
/// fixed resource budget and a scriptable mock engine.
pub async fn harness(scheduler: SchedulerConfig, engine: MockEngine) -> Harness {
    harness_with_store(scheduler, engine, Arc::new(JobStore::new_in_memory())).await
}

/// Same wiring over a caller-provided store, e.g. a file-backed one.
pub async fn harness_with_store(
    scheduler: SchedulerConfig,
    engine: MockEngine,
    store: Arc<JobStore>,
) -> Harness {
    let catalog = Arc::new(ModelCatalog::with_builtin_entries());
    let mut datasets = StaticDatasetProvider::new();
    datasets.insert(SMALL_DATASET, small_profile());
    let resources =
        StaticResources(AvailableResources { memory_mb: 16_384, accelerator_count: 1 });
    let engine = Arc::new(engine);

    let orchestrator = Orchestrator::new(
        scheduler,
        catalog,
        Arc::clone(&store),
        Arc::new(datasets),
        Arc::new(resources),
        Arc::clone(&engine) as Arc<dyn anneal_orchestrator::TrainingEngine>,
    )
    .expect("orchestrator wiring failed");
    orchestrator.register_project(PROJECT).await;
    Harness { orchestrator, engine, store }
}

pub fn fast_scheduler(slots: usize) -> SchedulerConfig {
    SchedulerConfig { slots, poll_interval_ms: 10, ..SchedulerConfig::default() }
}

/// Polls the store until the job satisfies the predicate or 5s elapse.
pub async fn wait_for(
    orchestrator: &Orchestrator,
    id: &JobId,
    pred: impl Fn(&TrainingJob) -> bool,
) -> TrainingJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = orchestrator.get_job(id).await.expect("job should exist");
        if pred(&job) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {id}, last state: {:?} progress {}",
            job.status,
            job.progress
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
