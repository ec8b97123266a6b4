//! Training job orchestration for Anneal.
//!
//! Drives fine-tuning jobs through a durable lifecycle with bounded
//! concurrency: a validated job is queued, admitted FIFO into a fixed pool
//! of worker slots, stepped through the external training engine with
//! checkpointing and cooperative cancellation, and finally benchmarked by
//! the evaluation runner. The [`Orchestrator`] facade is the only entry
//! point the surrounding application uses.

pub mod engine;
pub mod error;
pub mod evaluate;
pub mod job;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod store;

pub use engine::{
    BenchmarkReport, CheckpointHandle, EngineError, MockEngine, StepContext, StepResult,
    TrainingEngine,
};
pub use error::{OrchestratorError, Result};
pub use evaluate::{EvaluationResult, EvaluationRunner};
pub use job::{JobId, JobStatus, MetricPoint, MetricValue, TrainingJob, RESERVED_ERROR_KEY};
pub use progress::{ProgressMessage, ProgressSender};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use service::Orchestrator;
pub use store::{JobStore, ORPHANED_REASON};
