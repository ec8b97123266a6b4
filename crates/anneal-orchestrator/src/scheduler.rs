//! Worker pool with bounded, FIFO admission of queued jobs.
//!
//! A background loop polls the store for `Queued` jobs in creation order and
//! admits them into a fixed number of execution slots. Each admitted job runs
//! on its own task, stepping the external training engine, streaming progress
//! over the channel, checkpointing on the configured cadence and observing
//! its cancellation token after every step. Cancellation is cooperative and
//! lands within one step's duration, never mid-step; a pending save boundary
//! still writes its checkpoint before the job stops.

use crate::engine::{EngineError, StepContext, TrainingEngine};
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, JobStatus, MetricPoint, TrainingJob};
use crate::progress::{self, spawn_progress_pump, ProgressMessage, ProgressSender};
use crate::store::JobStore;
use anneal_core::{estimate_peak_memory_mb, ModelCatalog};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of execution slots; the hard bound on concurrently running
    /// jobs. Bounded in practice by available accelerators.
    pub slots: usize,
    /// Queue poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Retry budget for transient step failures, per job.
    pub max_transient_retries: u32,
    /// Memory budget of a single slot in MB; a queued job estimated above
    /// this is held in queue, not rejected.
    pub slot_memory_mb: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: 2,
            poll_interval_ms: 100,
            max_transient_retries: 1,
            slot_memory_mb: 16_384,
        }
    }
}

impl SchedulerConfig {
    /// Loads the configuration from a TOML document; missing keys fall back
    /// to the defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| OrchestratorError::Other(format!("bad scheduler config: {e}")))
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bounded worker pool over the job store.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<JobStore>,
    catalog: Arc<ModelCatalog>,
    engine: Arc<dyn TrainingEngine>,
    semaphore: Arc<Semaphore>,
    cancel_tokens: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
    progress_tx: ProgressSender,
    shutdown_tx: Option<mpsc::UnboundedSender<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &self.shutdown_tx.is_some())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        store: Arc<JobStore>,
        catalog: Arc<ModelCatalog>,
        engine: Arc<dyn TrainingEngine>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.slots));
        let (progress_tx, _pump) = spawn_progress_pump(Arc::clone(&store));
        Self {
            config,
            store,
            catalog,
            engine,
            semaphore,
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            progress_tx,
            shutdown_tx: None,
        }
    }

    /// Starts the admission loop in a background task.
    pub fn start(&mut self) -> Result<()> {
        if self.shutdown_tx.is_some() {
            return Err(OrchestratorError::InvalidState(
                "scheduler is already running".to_string(),
            ));
        }
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel();
        self.shutdown_tx = Some(shutdown_tx);

        let config = self.config.clone();
        let store = Arc::clone(&self.store);
        let catalog = Arc::clone(&self.catalog);
        let engine = Arc::clone(&self.engine);
        let semaphore = Arc::clone(&self.semaphore);
        let cancel_tokens = Arc::clone(&self.cancel_tokens);
        let progress_tx = self.progress_tx.clone();

        tokio::spawn(async move {
            info!(slots = config.slots, "Scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler shutdown signal received");
                        break;
                    }
                    () = time::sleep(config.poll_interval()) => {
                        admit_queued(
                            &config,
                            &store,
                            &catalog,
                            &engine,
                            &semaphore,
                            &cancel_tokens,
                            &progress_tx,
                        )
                        .await;
                    }
                }
            }
            info!("Scheduler stopped");
        });
        Ok(())
    }

    /// Stops admitting new jobs. Jobs already running finish on their own.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Confirms a job is visible to the admission loop. Admission itself is
    /// poll-driven; a queued job needs no further nudge.
    pub async fn enqueue(&self, id: &JobId) -> Result<()> {
        let job = self.store.get(id).await?;
        if job.status != JobStatus::Queued {
            return Err(OrchestratorError::InvalidState(format!(
                "job {id} is {:?}, not queued",
                job.status
            )));
        }
        Ok(())
    }

    /// Requests cancellation.
    ///
    /// A queued job is cancelled immediately and never reaches a worker. A
    /// running job has its token flagged and stops at the next checkpoint
    /// boundary. Anything else is an invalid state for cancellation.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let job = self.store.get(id).await?;
        match job.status {
            JobStatus::Queued => {
                self.store.transition(id, JobStatus::Cancelled).await?;
                info!(job_id = %id, "Cancelled queued job");
                Ok(())
            }
            JobStatus::Running => {
                let tokens = self.cancel_tokens.read().await;
                if let Some(token) = tokens.get(id) {
                    token.cancel();
                    info!(job_id = %id, "Cancellation flagged for running job");
                }
                // A missing token means the worker is already finishing up.
                Ok(())
            }
            status => Err(OrchestratorError::InvalidState(format!(
                "cannot cancel job {id} in state {status:?}"
            ))),
        }
    }
}

/// One admission pass: admit queued jobs oldest-first while slots are free.
///
/// A job whose estimated footprint exceeds the slot budget is held in queue
/// (it was validated at creation and is not re-validated here); smaller jobs
/// behind it may still be admitted.
#[allow(clippy::too_many_arguments)]
async fn admit_queued(
    config: &SchedulerConfig,
    store: &Arc<JobStore>,
    catalog: &Arc<ModelCatalog>,
    engine: &Arc<dyn TrainingEngine>,
    semaphore: &Arc<Semaphore>,
    cancel_tokens: &Arc<RwLock<HashMap<JobId, CancellationToken>>>,
    progress_tx: &ProgressSender,
) {
    for job in store.list_by_status(JobStatus::Queued).await {
        if semaphore.available_permits() == 0 {
            break;
        }

        let entry = match catalog.get(&job.model_id) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Model missing from catalog");
                let _ = store.record_failure(&job.id, "model missing from catalog").await;
                continue;
            }
        };
        let estimated_mb = estimate_peak_memory_mb(
            entry.size,
            job.config.batch_size,
            job.config.max_length,
            job.config.effective_quantization(),
        );
        if estimated_mb > config.slot_memory_mb {
            debug!(
                job_id = %job.id,
                estimated_mb,
                slot_memory_mb = config.slot_memory_mb,
                "Held in queue: exceeds slot budget"
            );
            continue;
        }

        let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
            break;
        };
        // The token is registered before the job becomes visible as Running,
        // so a cancel that observes Running always finds it.
        let token = CancellationToken::new();
        cancel_tokens.write().await.insert(job.id.clone(), token.clone());
        // The slot is granted: Queued -> Running. A job cancelled since the
        // listing fails this transition and simply gives the permit back.
        if store.transition(&job.id, JobStatus::Running).await.is_err() {
            cancel_tokens.write().await.remove(&job.id);
            continue;
        }
        info!(job_id = %job.id, model_id = %job.model_id, "Admitted job to worker slot");

        let store = Arc::clone(store);
        let engine = Arc::clone(engine);
        let cancel_tokens = Arc::clone(cancel_tokens);
        let progress_tx = progress_tx.clone();
        let retries = config.max_transient_retries;
        tokio::spawn(async move {
            let _permit = permit; // Hold the slot for the whole run.
            let id = job.id.clone();
            run_job(&store, &engine, &progress_tx, token, job, retries).await;
            cancel_tokens.write().await.remove(&id);
        });
    }
}

/// Executes one admitted job to a terminal state. Each step gets a fresh
/// transient-retry budget.
async fn run_job(
    store: &Arc<JobStore>,
    engine: &Arc<dyn TrainingEngine>,
    progress_tx: &ProgressSender,
    token: CancellationToken,
    job: TrainingJob,
    max_transient_retries: u32,
) {
    let id = job.id.clone();
    let total = job.total_steps.max(1);
    let save_steps = u64::from(job.config.save_steps.max(1));
    let mut retries_left = max_transient_retries;

    let mut step = 0_u64;
    if let Some(handle) = &job.checkpoint {
        match engine.resume(handle).await {
            Ok(resumed) => {
                step = resumed.min(total);
                info!(job_id = %id, step, "Resumed from checkpoint");
            }
            Err(e) => {
                progress::flush(progress_tx).await;
                let _ = store.record_failure(&id, &format!("resume failed: {e}")).await;
                return;
            }
        }
    }

    while step < total {
        let ctx = StepContext {
            job_id: id.clone(),
            model_id: job.model_id.clone(),
            config: job.config.clone(),
            step,
            total_steps: total,
        };
        match engine.run_step(&ctx).await {
            Ok(result) => {
                step += 1;
                retries_left = max_transient_retries;
                let mut deltas = BTreeMap::new();
                deltas.insert(
                    "loss".to_string(),
                    vec![MetricPoint { step, value: result.loss }],
                );
                deltas.insert(
                    "tokens_processed".to_string(),
                    vec![MetricPoint { step, value: result.tokens_processed as f64 }],
                );
                let _ = progress_tx.send(ProgressMessage::Report {
                    job_id: id.clone(),
                    fraction: step as f64 / total as f64,
                    deltas,
                });
            }
            Err(EngineError::Transient(reason)) if retries_left > 0 => {
                retries_left -= 1;
                warn!(job_id = %id, step, reason, "Transient step failure, retrying");
                continue;
            }
            Err(e) => {
                progress::flush(progress_tx).await;
                let _ = store.record_failure(&id, &e.to_string()).await;
                return;
            }
        }

        // Checkpoint boundary: persist a resume point before any pending
        // cancellation is honored.
        if step % save_steps == 0 || step == total {
            let ctx = StepContext {
                job_id: id.clone(),
                model_id: job.model_id.clone(),
                config: job.config.clone(),
                step,
                total_steps: total,
            };
            match engine.checkpoint(&ctx).await {
                Ok(handle) => {
                    let _ = store.set_checkpoint(&id, handle).await;
                }
                Err(e) => {
                    warn!(job_id = %id, step, error = %e, "Checkpoint write failed");
                }
            }
        }
        // Cancellation lands between steps, never mid-step.
        if token.is_cancelled() {
            progress::flush(progress_tx).await;
            let _ = store.transition(&id, JobStatus::Cancelled).await;
            info!(job_id = %id, step, "Job cancelled at step boundary");
            return;
        }
    }

    progress::flush(progress_tx).await;
    let _ = store.transition(&id, JobStatus::Completed).await;
    info!(job_id = %id, "Job completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.slots, 2);
        assert_eq!(cfg.max_transient_retries, 1);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_config_from_toml_with_partial_keys() {
        let cfg = SchedulerConfig::from_toml_str("slots = 4\npoll_interval_ms = 10\n").unwrap();
        assert_eq!(cfg.slots, 4);
        assert_eq!(cfg.poll_interval_ms, 10);
        // Unspecified keys keep their defaults.
        assert_eq!(cfg.max_transient_retries, 1);
        assert_eq!(cfg.slot_memory_mb, 16_384);
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        assert!(SchedulerConfig::from_toml_str("slots = \"many\"").is_err());
    }
}
