//! Message-passing progress channel between workers and the store.
//!
//! Workers never write progress into the store directly; they send reports
//! over an mpsc channel and a single pump task applies them in order. A
//! worker that is about to make a terminal transition sends a `Flush` and
//! waits for the ack, which guarantees every earlier report for its job has
//! been applied first.

use crate::job::{JobId, MetricPoint};
use crate::store::JobStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One message from a worker to the store pump.
#[derive(Debug)]
pub enum ProgressMessage {
    /// A progress fraction plus metric deltas for one job.
    Report {
        job_id: JobId,
        fraction: f64,
        deltas: BTreeMap<String, Vec<MetricPoint>>,
    },
    /// Ack once every message sent before this one has been applied.
    Flush(oneshot::Sender<()>),
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressMessage>;

/// Spawns the pump task that drains the channel into the store.
///
/// The pump ends when every sender is dropped. Reports for jobs that have
/// already left the running state are dropped with a warning rather than
/// surfaced; the job's own terminal state is the authoritative outcome.
pub fn spawn_progress_pump(
    store: Arc<JobStore>,
) -> (ProgressSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressMessage>();
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                ProgressMessage::Report { job_id, fraction, deltas } => {
                    debug!(job_id = %job_id, fraction, "Applying progress report");
                    if let Err(e) = store.report_progress(&job_id, fraction, &deltas).await {
                        warn!(job_id = %job_id, error = %e, "Dropping stale progress report");
                    }
                }
                ProgressMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Progress pump stopped");
    });
    (tx, handle)
}

/// Sends a flush and waits until the pump has applied all prior reports.
pub async fn flush(tx: &ProgressSender) {
    let (ack_tx, ack_rx) = oneshot::channel();
    if tx.send(ProgressMessage::Flush(ack_tx)).is_ok() {
        let _ = ack_rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, TrainingJob};
    use anneal_core::TrainingConfig;

    #[tokio::test]
    async fn test_reports_applied_in_order_before_flush_ack() {
        let store = Arc::new(JobStore::new_in_memory());
        let job = TrainingJob::new("p1", "d1", "m1", TrainingConfig::default(), 10);
        let id = job.id.clone();
        store.insert(job).await.unwrap();
        store.transition(&id, JobStatus::Queued).await.unwrap();
        store.transition(&id, JobStatus::Running).await.unwrap();

        let (tx, pump) = spawn_progress_pump(Arc::clone(&store));
        for step in 1..=5_u64 {
            tx.send(ProgressMessage::Report {
                job_id: id.clone(),
                fraction: step as f64 / 10.0,
                deltas: BTreeMap::new(),
            })
            .unwrap();
        }
        flush(&tx).await;
        assert_eq!(store.get(&id).await.unwrap().progress, 0.5);

        drop(tx);
        pump.await.unwrap();
    }
}
