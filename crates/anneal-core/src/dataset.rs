//! Dataset profile types and the dataset service seam.
//!
//! Dataset parsing and format sniffing are an external collaborator; the core
//! only consumes the summarized profile.

use crate::catalog::TaskType;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Observed token-length statistics for a dataset's text columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenLengthStats {
    pub mean: f64,
    pub p95: u64,
    pub max: u64,
}

/// Summary of a dataset as reported by the dataset service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub row_count: u64,
    pub column_schema: Vec<String>,
    pub token_lengths: TokenLengthStats,
}

/// External dataset service contract.
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn get_profile(&self, dataset_id: &str) -> CoreResult<DatasetProfile>;
}

/// Fixed in-memory provider, used for wiring and tests.
#[derive(Debug, Default)]
pub struct StaticDatasetProvider {
    profiles: HashMap<String, DatasetProfile>,
}

impl StaticDatasetProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dataset_id: impl Into<String>, profile: DatasetProfile) {
        self.profiles.insert(dataset_id.into(), profile);
    }
}

#[async_trait]
impl DatasetProvider for StaticDatasetProvider {
    async fn get_profile(&self, dataset_id: &str) -> CoreResult<DatasetProfile> {
        self.profiles
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("dataset", dataset_id))
    }
}

/// Guesses a task type from column names when the caller didn't state one.
///
/// Matching is on lowercase substrings; unknown shapes return `None` rather
/// than a wrong guess.
#[must_use]
pub fn infer_task_type(profile: &DatasetProfile) -> Option<TaskType> {
    let columns: Vec<String> =
        profile.column_schema.iter().map(|c| c.to_lowercase()).collect();
    let has = |needle: &str| columns.iter().any(|c| c.contains(needle));

    if has("summary") || has("highlights") {
        return Some(TaskType::Summarization);
    }
    if has("question") && has("answer") {
        return Some(TaskType::QuestionAnswering);
    }
    if has("label") || has("class") {
        return Some(TaskType::Classification);
    }
    if (has("prompt") || has("instruction")) && (has("response") || has("completion")) {
        return Some(TaskType::Chat);
    }
    if has("text") {
        return Some(TaskType::TextGeneration);
    }
    None
}
