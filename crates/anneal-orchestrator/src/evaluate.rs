//! Benchmark evaluation of completed jobs.
//!
//! The runner's own responsibilities are the precondition check and the
//! append-only persistence of results (one JSON record per job beside the
//! job store); the scoring itself is delegated to the external
//! training-and-evaluation engine.

use crate::engine::{BenchmarkReport, TrainingEngine};
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, JobStatus};
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Benchmark metrics recorded against one completed job. Append-only: at
/// most one result per job, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: String,
    pub job_id: JobId,
    pub metrics: BTreeMap<String, f64>,
    /// Per-suite breakdowns, when the engine ran benchmark suites.
    pub benchmark_results: Option<BTreeMap<String, BTreeMap<String, f64>>>,
    pub created_at: DateTime<Utc>,
}

/// Runs benchmarks for completed jobs and stores the results.
pub struct EvaluationRunner {
    store: Arc<JobStore>,
    engine: Arc<dyn TrainingEngine>,
    results: RwLock<HashMap<JobId, EvaluationResult>>,
    results_dir: Option<PathBuf>,
}

impl std::fmt::Debug for EvaluationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationRunner")
            .field("results_dir", &self.results_dir)
            .finish_non_exhaustive()
    }
}

impl EvaluationRunner {
    /// Wires the runner. When the job store is file-backed, results live in
    /// a sibling `evaluations` directory and any recorded by a previous run
    /// are loaded back.
    pub fn new(store: Arc<JobStore>, engine: Arc<dyn TrainingEngine>) -> Result<Self> {
        let results_dir = match store.data_dir() {
            Some(data_dir) => {
                let dir = data_dir.join("evaluations");
                std::fs::create_dir_all(&dir)?;
                Some(dir)
            }
            None => None,
        };

        let mut results = HashMap::new();
        if let Some(dir) = &results_dir {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension() != Some(std::ffi::OsStr::new("json")) {
                    continue;
                }
                let bytes = std::fs::read(&path)?;
                match serde_json::from_slice::<EvaluationResult>(&bytes) {
                    Ok(result) => {
                        results.insert(result.job_id.clone(), result);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable evaluation record");
                    }
                }
            }
            info!(count = results.len(), dir = %dir.display(), "Loaded evaluation records");
        }

        Ok(Self { store, engine, results: RwLock::new(results), results_dir })
    }

    fn persist(&self, result: &EvaluationResult) -> Result<()> {
        if let Some(dir) = &self.results_dir {
            let path = dir.join(format!("{}.json", result.job_id));
            std::fs::write(path, serde_json::to_vec_pretty(result)?)?;
        }
        Ok(())
    }

    /// Evaluates a completed job.
    ///
    /// Callable only when the job is `Completed`; anything else is an
    /// invalid state. A second call for the same job returns the recorded
    /// result instead of re-running the benchmark.
    pub async fn evaluate(&self, job_id: &JobId) -> Result<EvaluationResult> {
        if let Some(existing) = self.results.read().await.get(job_id) {
            return Ok(existing.clone());
        }

        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(OrchestratorError::InvalidState(format!(
                "job {job_id} is {:?}; only completed jobs can be evaluated",
                job.status
            )));
        }

        let BenchmarkReport { metrics, suites } = self
            .engine
            .benchmark(&job)
            .await
            .map_err(|e| OrchestratorError::Other(format!("benchmark failed: {e}")))?;
        let result = EvaluationResult {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.clone(),
            metrics,
            benchmark_results: if suites.is_empty() { None } else { Some(suites) },
            created_at: Utc::now(),
        };
        info!(job_id = %job_id, "Recorded evaluation result");

        // First writer wins if two evaluations raced; only the stored result
        // is ever written to disk.
        let stored = {
            let mut results = self.results.write().await;
            results.entry(job_id.clone()).or_insert(result).clone()
        };
        self.persist(&stored)?;
        Ok(stored)
    }

    /// The recorded result for a job, if one exists.
    pub async fn get(&self, job_id: &JobId) -> Option<EvaluationResult> {
        self.results.read().await.get(job_id).cloned()
    }
}
