//! Error types for job orchestration.

use crate::job::JobStatus;
use anneal_core::CoreError;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Validation or lookup failure from the core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A lifecycle transition not in the transition table was requested
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Operation attempted against a job in the wrong state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No execution slot available for a caller expecting immediate execution
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("orchestration error: {0}")]
    Other(String),
}
