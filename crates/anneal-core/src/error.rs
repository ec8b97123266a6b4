use crate::validator::ValidationErrors;
use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// One or more configuration checks failed. Always carries the full
    /// batch of failures, never a partial set.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Unknown project/dataset/model/job identifier.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An operation was attempted against an object in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No catalog model is eligible for the requested task type.
    #[error("no catalog model supports task type '{task}'")]
    NoCandidate { task: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Convenience constructor for lookup failures.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}
