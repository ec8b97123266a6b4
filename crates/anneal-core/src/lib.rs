//! Anneal Core
//!
//! Catalog, configuration and recommendation primitives for the fine-tuning
//! platform:
//! - Registry of available base models and their requirements (`ModelCatalog`)
//! - Training configuration value object (`TrainingConfig`)
//! - Resource-aware configuration validation (`validate`)
//! - Model + configuration recommendation (`recommend`)

pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod recommend;
pub mod resources;
pub mod validator;

pub use catalog::{
    builtin_entries, ModelCatalog, ModelCatalogEntry, ModelRequirements, QuantizationMode,
    SizeClass, TaskType,
};
pub use config::TrainingConfig;
pub use dataset::{
    infer_task_type, DatasetProfile, DatasetProvider, StaticDatasetProvider, TokenLengthStats,
};
pub use error::{CoreError, CoreResult};
pub use recommend::{recommend, Recommendation, RecommendWeights};
pub use resources::{
    estimate_peak_memory_mb, AvailableResources, ResourceMonitor, StaticResources, FREE_TIER,
};
pub use validator::{validate, ValidationError, ValidationErrors};
