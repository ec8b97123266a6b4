//! Durable record of every training job.
//!
//! The store is the single source of truth the validator, scheduler and
//! evaluation runner read and write through. Each job lives behind its own
//! lock so unrelated jobs never serialize behind one another; the outer map
//! lock is only held long enough to look a job up. Every mutation is written
//! through to `<data_dir>/jobs/<id>.json` when the store is file-backed, so
//! the record survives process restarts.

use crate::engine::CheckpointHandle;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, JobStatus, MetricPoint, TrainingJob};
use anneal_core::CoreError;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Failure reason recorded for jobs left running over a restart with no
/// checkpoint to resume from.
pub const ORPHANED_REASON: &str = "orphaned on restart";

/// Job store with per-job write locks and optional file backing.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<RwLock<TrainingJob>>>>,
    jobs_dir: Option<PathBuf>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs_dir", &self.jobs_dir)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Creates a store with no file backing; records live only in memory.
    #[must_use]
    pub fn new_in_memory() -> Self {
        Self { jobs: RwLock::new(HashMap::new()), jobs_dir: None }
    }

    /// Opens a file-backed store under `data_dir`, loading every job record
    /// already present.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let jobs_dir = data_dir.join("jobs");
        std::fs::create_dir_all(&jobs_dir)?;

        let mut map = HashMap::new();
        for entry in std::fs::read_dir(&jobs_dir)? {
            let path = entry?.path();
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<TrainingJob>(&bytes) {
                Ok(job) => {
                    map.insert(job.id.clone(), Arc::new(RwLock::new(job)));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }
        info!(count = map.len(), dir = %jobs_dir.display(), "Loaded job records");

        Ok(Self { jobs: RwLock::new(map), jobs_dir: Some(jobs_dir) })
    }

    /// Root data directory when the store is file-backed.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.jobs_dir.as_deref().and_then(Path::parent)
    }

    fn persist(&self, job: &TrainingJob) -> Result<()> {
        if let Some(dir) = &self.jobs_dir {
            let path = dir.join(format!("{}.json", job.id));
            std::fs::write(path, serde_json::to_vec_pretty(job)?)?;
        }
        Ok(())
    }

    async fn entry(&self, id: &JobId) -> Result<Arc<RwLock<TrainingJob>>> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("job", id.0.clone()).into())
    }

    pub async fn insert(&self, job: TrainingJob) -> Result<()> {
        self.persist(&job)?;
        let mut jobs = self.jobs.write().await;
        debug!(job_id = %job.id, "Inserting job record");
        jobs.insert(job.id.clone(), Arc::new(RwLock::new(job)));
        Ok(())
    }

    pub async fn get(&self, id: &JobId) -> Result<TrainingJob> {
        let entry = self.entry(id).await?;
        let job = entry.read().await;
        Ok(job.clone())
    }

    /// All jobs, oldest first (ties broken by id).
    pub async fn list(&self) -> Vec<TrainingJob> {
        let entries: Vec<_> = {
            let jobs = self.jobs.read().await;
            jobs.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.read().await.clone());
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Jobs in the given state, oldest first (ties broken by id). This is
    /// the scheduler's FIFO admission order for `Queued`.
    pub async fn list_by_status(&self, status: JobStatus) -> Vec<TrainingJob> {
        let mut out = self.list().await;
        out.retain(|job| job.status == status);
        out
    }

    pub async fn running_count(&self) -> usize {
        self.list_by_status(JobStatus::Running).await.len()
    }

    /// Applies a lifecycle transition, enforcing the transition table and the
    /// timestamp invariants. Returns the previous status.
    ///
    /// Side effects by target state: `Running` sets `started_at`,
    /// `Completed` sets `progress = 1.0` and `completed_at`, `Failed` and
    /// `Cancelled` set `completed_at`. Each timestamp is set at most once.
    pub async fn transition(&self, id: &JobId, to: JobStatus) -> Result<JobStatus> {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        let from = job.status;
        if !from.can_transition_to(to) {
            warn!(job_id = %id, from = ?from, to = ?to, "Invalid state transition");
            return Err(OrchestratorError::InvalidTransition { from, to });
        }

        debug!(job_id = %id, from = ?from, to = ?to, "State transition");
        job.status = to;
        let now = Utc::now();
        match to {
            JobStatus::Running => {
                if job.started_at.is_none() {
                    job.started_at = Some(now);
                }
            }
            JobStatus::Completed => {
                job.progress = 1.0;
                job.completed_at = Some(now);
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                job.completed_at = Some(now);
            }
            JobStatus::Created | JobStatus::Queued => {}
        }
        self.persist(&job)?;
        Ok(from)
    }

    /// Applies a progress report from the worker. Progress is clamped to
    /// [0, 1] and never decreases; metric deltas only extend their series.
    /// Reports against a job that is not running are rejected.
    pub async fn report_progress(
        &self,
        id: &JobId,
        fraction: f64,
        deltas: &BTreeMap<String, Vec<MetricPoint>>,
    ) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        if job.status != JobStatus::Running {
            return Err(OrchestratorError::InvalidState(format!(
                "progress reported for job {id} in state {:?}",
                job.status
            )));
        }

        let clamped = fraction.clamp(0.0, 1.0);
        if clamped > job.progress {
            job.progress = clamped;
        }
        for (key, points) in deltas {
            job.append_metric_points(key, points)?;
        }
        self.persist(&job)?;
        Ok(())
    }

    pub async fn set_checkpoint(&self, id: &JobId, handle: CheckpointHandle) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        debug!(job_id = %id, step = handle.step, "Recording checkpoint");
        job.checkpoint = Some(handle);
        self.persist(&job)?;
        Ok(())
    }

    /// Fails a queued or running job, recording the reason under the
    /// reserved metrics key.
    pub async fn record_failure(&self, id: &JobId, reason: &str) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        let from = job.status;
        if !from.can_transition_to(JobStatus::Failed) {
            return Err(OrchestratorError::InvalidTransition { from, to: JobStatus::Failed });
        }
        warn!(job_id = %id, reason, "Job failed");
        job.record_error_detail(reason);
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        self.persist(&job)?;
        Ok(())
    }

    /// Resolves jobs a previous process left in a non-resting state.
    ///
    /// A `Running` job with a persisted checkpoint is put back in the queue
    /// and will resume from that checkpoint (`started_at` keeps recording its
    /// first entry into running). One without a checkpoint is failed with the
    /// distinct [`ORPHANED_REASON`], so operators can tell crash-recovery
    /// gaps from training errors. A `Created` job was persisted but never
    /// enqueued (the process died between the two writes); its config already
    /// passed validation, so it is queued. Returns the affected jobs and
    /// their new status.
    pub async fn recover_orphans(&self) -> Result<Vec<(JobId, JobStatus)>> {
        let mut recovered = Vec::new();
        for job in self.list_by_status(JobStatus::Running).await {
            let entry = self.entry(&job.id).await?;
            let mut job = entry.write().await;
            if job.checkpoint.is_some() {
                info!(job_id = %job.id, "Re-queueing orphaned job with checkpoint");
                // Recovery-only edge; not part of the public transition table.
                job.status = JobStatus::Queued;
            } else {
                warn!(job_id = %job.id, "Failing orphaned job without checkpoint");
                job.record_error_detail(ORPHANED_REASON);
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
            }
            self.persist(&job)?;
            recovered.push((job.id.clone(), job.status));
        }
        for job in self.list_by_status(JobStatus::Created).await {
            let entry = self.entry(&job.id).await?;
            let mut job = entry.write().await;
            info!(job_id = %job.id, "Queueing job persisted before enqueue");
            job.status = JobStatus::Queued;
            self.persist(&job)?;
            recovered.push((job.id.clone(), job.status));
        }
        Ok(recovered)
    }
}
