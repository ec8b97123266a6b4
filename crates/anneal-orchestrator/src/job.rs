//! Training job record and lifecycle state machine.

use crate::engine::CheckpointHandle;
use crate::error::{OrchestratorError, Result};
use anneal_core::TrainingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reserved metrics key under which failure detail is recorded.
pub const RESERVED_ERROR_KEY: &str = "error";

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job record exists but has not been admitted to the queue.
    Created,
    /// Validated and waiting for a worker slot.
    Queued,
    /// Executing in a worker slot.
    Running,
    /// Finished all steps; terminal.
    Completed,
    /// Unrecoverable worker/training error; terminal.
    Failed,
    /// Explicitly cancelled; terminal.
    Cancelled,
}

impl JobStatus {
    /// Checks whether the lifecycle table permits a transition to `to`.
    ///
    /// There is deliberately no `Running -> Paused` edge: cancellation is the
    /// only interruption and it is terminal. Self-transitions are invalid.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Created, Self::Queued) => true,
            (Self::Queued, Self::Running | Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One observation in a named scalar series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub step: u64,
    pub value: f64,
}

/// A metrics-map entry: either a scalar series or recorded text (the
/// reserved error key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Series(Vec<MetricPoint>),
    Text(String),
}

/// A fine-tuning job and its current state.
///
/// Mutated only through [`crate::store::JobStore`]; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: JobId,
    pub project_id: String,
    pub dataset_id: String,
    pub model_id: String,
    /// Config snapshot taken at creation time, never mutated afterwards.
    pub config: TrainingConfig,
    pub status: JobStatus,
    /// Fraction complete, in [0, 1], non-decreasing while running.
    pub progress: f64,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Total optimizer steps, fixed at creation from the dataset profile.
    pub total_steps: u64,
    pub checkpoint: Option<CheckpointHandle>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrainingJob {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        model_id: impl Into<String>,
        config: TrainingConfig,
        total_steps: u64,
    ) -> Self {
        Self {
            id: JobId::new(),
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            model_id: model_id.into(),
            config,
            status: JobStatus::Created,
            progress: 0.0,
            metrics: BTreeMap::new(),
            total_steps,
            checkpoint: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Appends points to a named series. Existing points are never
    /// overwritten; the reserved error key cannot be extended as a series.
    pub fn append_metric_points(&mut self, key: &str, points: &[MetricPoint]) -> Result<()> {
        match self.metrics.entry(key.to_string()).or_insert_with(|| MetricValue::Series(Vec::new()))
        {
            MetricValue::Series(series) => {
                series.extend_from_slice(points);
                Ok(())
            }
            MetricValue::Text(_) => Err(OrchestratorError::InvalidState(format!(
                "metrics key '{key}' holds recorded text, not a series"
            ))),
        }
    }

    /// Records failure detail under the reserved key, at most once.
    pub fn record_error_detail(&mut self, reason: &str) {
        self.metrics
            .entry(RESERVED_ERROR_KEY.to_string())
            .or_insert_with(|| MetricValue::Text(reason.to_string()));
    }

    /// The recorded failure reason, if any.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        match self.metrics.get(RESERVED_ERROR_KEY) {
            Some(MetricValue::Text(reason)) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use JobStatus::{Cancelled, Completed, Created, Failed, Queued, Running};

        assert!(Created.can_transition_to(Queued));
        assert!(!Created.can_transition_to(Running));
        assert!(!Created.can_transition_to(Cancelled));

        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Completed));

        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Queued));

        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Created, Queued, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(to));
            }
        }

        // Self-transitions are never silently valid.
        for status in [Created, Queued, Running] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_fresh_job_is_created() {
        let job = TrainingJob::new("p1", "d1", "m1", TrainingConfig::default(), 100);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.progress, 0.0);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_metric_series_are_append_only() {
        let mut job = TrainingJob::new("p1", "d1", "m1", TrainingConfig::default(), 100);
        job.append_metric_points("loss", &[MetricPoint { step: 1, value: 2.0 }]).unwrap();
        job.append_metric_points("loss", &[MetricPoint { step: 2, value: 1.8 }]).unwrap();
        let Some(MetricValue::Series(series)) = job.metrics.get("loss") else {
            panic!("expected a loss series");
        };
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].step, 1);
    }

    #[test]
    fn test_error_detail_recorded_once() {
        let mut job = TrainingJob::new("p1", "d1", "m1", TrainingConfig::default(), 100);
        job.record_error_detail("first reason");
        job.record_error_detail("second reason");
        assert_eq!(job.error_detail(), Some("first reason"));

        let err = job.append_metric_points(RESERVED_ERROR_KEY, &[MetricPoint { step: 1, value: 0.0 }]);
        assert!(err.is_err());
    }
}
