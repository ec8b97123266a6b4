//! Orchestration entry point exposed to the surrounding application.
//!
//! The web layer is an external caller; it talks to the core exclusively
//! through this facade. Job creation validates and enqueues synchronously
//! and returns immediately — training runs off the request path and all
//! progress is observed by polling [`Orchestrator::get_job`].

use crate::engine::TrainingEngine;
use crate::error::Result;
use crate::evaluate::{EvaluationResult, EvaluationRunner};
use crate::job::{JobId, JobStatus, TrainingJob};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::JobStore;
use anneal_core::{
    recommend, validate, CoreError, DatasetProvider, ModelCatalog, Recommendation,
    RecommendWeights, ResourceMonitor, TaskType, TrainingConfig,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Facade over the catalog, job store, scheduler and evaluation runner.
pub struct Orchestrator {
    catalog: Arc<ModelCatalog>,
    store: Arc<JobStore>,
    scheduler: Scheduler,
    evaluator: EvaluationRunner,
    datasets: Arc<dyn DatasetProvider>,
    resources: Arc<dyn ResourceMonitor>,
    weights: RecommendWeights,
    /// Known project ids; projects are otherwise an external concern.
    projects: RwLock<HashSet<String>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wires the orchestrator together, reloading any evaluation results a
    /// previous run recorded. Call [`Orchestrator::start`] to begin
    /// admitting queued jobs.
    pub fn new(
        config: SchedulerConfig,
        catalog: Arc<ModelCatalog>,
        store: Arc<JobStore>,
        datasets: Arc<dyn DatasetProvider>,
        resources: Arc<dyn ResourceMonitor>,
        engine: Arc<dyn TrainingEngine>,
    ) -> Result<Self> {
        let scheduler =
            Scheduler::new(config, Arc::clone(&store), Arc::clone(&catalog), Arc::clone(&engine));
        let evaluator = EvaluationRunner::new(Arc::clone(&store), engine)?;
        Ok(Self {
            catalog,
            store,
            scheduler,
            evaluator,
            datasets,
            resources,
            weights: RecommendWeights::default(),
            projects: RwLock::new(HashSet::new()),
        })
    }

    /// Overrides the recommendation scoring weights.
    #[must_use]
    pub fn with_recommend_weights(mut self, weights: RecommendWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Resolves jobs orphaned by a previous process, then starts the
    /// scheduler.
    pub async fn start(&mut self) -> Result<()> {
        let recovered = self.store.recover_orphans().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Resolved orphaned jobs from previous run");
        }
        self.scheduler.start()
    }

    /// Stops admitting new jobs; running jobs finish on their own.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    pub async fn register_project(&self, project_id: impl Into<String>) {
        self.projects.write().await.insert(project_id.into());
    }

    /// Validates a requested job and admits it to the queue.
    ///
    /// Lookup failures and the full validation batch are returned
    /// synchronously; everything that can go wrong after this point is
    /// recorded on the job record instead and discovered by polling.
    pub async fn create_job(
        &self,
        project_id: &str,
        dataset_id: &str,
        model_id: &str,
        config: TrainingConfig,
    ) -> Result<JobId> {
        if !self.projects.read().await.contains(project_id) {
            return Err(CoreError::not_found("project", project_id).into());
        }
        let profile = self.datasets.get_profile(dataset_id).await?;
        let entry = self.catalog.get(model_id)?;
        let available = self.resources.available_resources();

        validate(&config, &entry, &profile, available).map_err(CoreError::Validation)?;

        let total_steps = config.total_steps(profile.row_count);
        let job = TrainingJob::new(project_id, dataset_id, model_id, config, total_steps);
        let id = job.id.clone();

        // Persisting the record and queueing it are one admission step; a
        // job is never observable as Created with its config unsaved.
        self.store.insert(job).await?;
        self.store.transition(&id, JobStatus::Queued).await?;
        self.scheduler.enqueue(&id).await?;
        info!(job_id = %id, model_id, dataset_id, total_steps, "Created training job");
        Ok(id)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<TrainingJob> {
        self.store.get(id).await
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<TrainingJob> {
        self.store.list().await
    }

    /// Cancels a queued or running job; terminal jobs are left untouched
    /// and reported as an invalid state.
    pub async fn cancel_job(&self, id: &JobId) -> Result<()> {
        self.scheduler.cancel(id).await
    }

    /// Proposes a model and starting configuration for a goal and dataset.
    /// Never mutates job state.
    pub async fn recommend(
        &self,
        goal: Option<&str>,
        dataset_id: &str,
        task_type: Option<TaskType>,
    ) -> Result<Recommendation> {
        let profile = self.datasets.get_profile(dataset_id).await?;
        Ok(recommend(&self.catalog, self.weights, goal, &profile, task_type)?)
    }

    /// Benchmarks a completed job, recording the result append-only.
    pub async fn evaluate(&self, job_id: &JobId) -> Result<EvaluationResult> {
        self.evaluator.evaluate(job_id).await
    }

    /// The recorded evaluation for a job, if any.
    pub async fn get_evaluation(&self, job_id: &JobId) -> Option<EvaluationResult> {
        self.evaluator.get(job_id).await
    }

    /// The model catalog, for read-only listings.
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }
}
