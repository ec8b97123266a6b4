//! The external training-and-evaluation engine seam.
//!
//! The orchestrator treats training mathematics as a black box behind this
//! trait: run one step, write a checkpoint, resume from one, benchmark a
//! finished model. Failures are classified so the scheduler can retry the
//! transient ones.

use crate::job::{JobId, TrainingJob};
use anneal_core::TrainingConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Everything the engine needs to advance one job by one step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    pub model_id: String,
    pub config: TrainingConfig,
    /// Steps completed so far.
    pub step: u64,
    pub total_steps: u64,
}

/// Outcome of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub loss: f64,
    pub tokens_processed: u64,
}

/// Durable handle to a training snapshot a job can resume from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHandle {
    pub job_id: JobId,
    /// Steps completed at the time of the snapshot.
    pub step: u64,
    pub uri: String,
    pub created_at: DateTime<Utc>,
}

/// Benchmark output for a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Headline metrics (accuracy, f1, perplexity, ...).
    pub metrics: BTreeMap<String, f64>,
    /// Per-suite breakdowns, when the engine ran benchmark suites.
    pub suites: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Engine failures, classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Resource contention or similar; worth one retry.
    #[error("transient engine failure: {0}")]
    Transient(String),

    /// Anything else; fails the job immediately.
    #[error("fatal engine failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait TrainingEngine: Send + Sync {
    /// Advances training by one scheduled step.
    async fn run_step(&self, ctx: &StepContext) -> std::result::Result<StepResult, EngineError>;

    /// Persists a snapshot the job can later resume from.
    async fn checkpoint(
        &self,
        ctx: &StepContext,
    ) -> std::result::Result<CheckpointHandle, EngineError>;

    /// Restores engine state from a snapshot; returns the completed step
    /// count to resume at.
    async fn resume(&self, handle: &CheckpointHandle) -> std::result::Result<u64, EngineError>;

    /// Scores the trained artifact of a completed job.
    async fn benchmark(
        &self,
        job: &TrainingJob,
    ) -> std::result::Result<BenchmarkReport, EngineError>;
}

/// Deterministic in-process engine used for wiring and tests.
///
/// Produces a smoothly decaying loss curve and can be scripted to fail at
/// chosen steps. A scripted transient failure fires once and is then
/// consumed, so a retry of the same step succeeds.
#[derive(Debug, Default)]
pub struct MockEngine {
    step_delay: Option<Duration>,
    transient_failures: Mutex<HashMap<u64, String>>,
    fatal_failures: Mutex<HashMap<u64, String>>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a per-step delay, useful for observing in-flight state in tests.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Scripts a one-shot transient failure when starting step `step`.
    pub fn fail_transient_at(&self, step: u64, reason: impl Into<String>) {
        self.transient_failures
            .lock()
            .expect("mock engine lock poisoned")
            .insert(step, reason.into());
    }

    /// Scripts a fatal failure when starting step `step`.
    pub fn fail_fatal_at(&self, step: u64, reason: impl Into<String>) {
        self.fatal_failures
            .lock()
            .expect("mock engine lock poisoned")
            .insert(step, reason.into());
    }

    fn loss_at(step: u64, total: u64) -> f64 {
        let total = total.max(1) as f64;
        2.0 * (1.0 - step as f64 / total) + 0.1
    }
}

#[async_trait]
impl TrainingEngine for MockEngine {
    async fn run_step(&self, ctx: &StepContext) -> std::result::Result<StepResult, EngineError> {
        let next = ctx.step + 1;
        if let Some(reason) =
            self.transient_failures.lock().expect("mock engine lock poisoned").remove(&next)
        {
            return Err(EngineError::Transient(reason));
        }
        if let Some(reason) =
            self.fatal_failures.lock().expect("mock engine lock poisoned").get(&next)
        {
            return Err(EngineError::Fatal(reason.clone()));
        }
        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }
        let tokens = u64::from(ctx.config.batch_size) * u64::from(ctx.config.max_length);
        Ok(StepResult { loss: Self::loss_at(next, ctx.total_steps), tokens_processed: tokens })
    }

    async fn checkpoint(
        &self,
        ctx: &StepContext,
    ) -> std::result::Result<CheckpointHandle, EngineError> {
        Ok(CheckpointHandle {
            job_id: ctx.job_id.clone(),
            step: ctx.step,
            uri: format!("mock://checkpoints/{}/{}", ctx.job_id, ctx.step),
            created_at: Utc::now(),
        })
    }

    async fn resume(&self, handle: &CheckpointHandle) -> std::result::Result<u64, EngineError> {
        Ok(handle.step)
    }

    async fn benchmark(
        &self,
        job: &TrainingJob,
    ) -> std::result::Result<BenchmarkReport, EngineError> {
        let mut metrics = BTreeMap::new();
        metrics.insert("accuracy".to_string(), 0.82);
        metrics.insert("f1".to_string(), 0.79);
        metrics.insert("final_loss".to_string(), Self::loss_at(job.total_steps, job.total_steps));
        Ok(BenchmarkReport { metrics, suites: BTreeMap::new() })
    }
}
