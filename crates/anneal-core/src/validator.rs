//! Pre-admission checks for a requested training configuration.
//!
//! Every check is independent and all failures are reported together, so a
//! caller sees the complete problem set in one pass. Validation is pure: it
//! never touches job state.

use crate::catalog::{ModelCatalogEntry, QuantizationMode};
use crate::config::TrainingConfig;
use crate::dataset::DatasetProfile;
use crate::resources::{estimate_peak_memory_mb, AvailableResources};
use thiserror::Error;

/// One independent reason a configuration was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("lora_alpha ({alpha}) must be >= lora_r ({r})")]
    LoraAlphaBelowRank { r: u32, alpha: u32 },

    #[error("lora_dropout must be in [0, 1), got {0}")]
    DropoutOutOfRange(f64),

    #[error("model '{model}' does not support quantization mode '{mode}'")]
    UnsupportedQuantization { model: String, mode: QuantizationMode },

    #[error("model '{model}' requires quantization to fit in available memory")]
    QuantizationRequired { model: String },

    #[error("estimated peak memory {estimated_mb} MB exceeds available {available_mb} MB")]
    MemoryExceeded { estimated_mb: u64, available_mb: u64 },

    #[error("max_length {max_length} exceeds model context limit {limit}")]
    ContextLengthExceeded { max_length: u32, limit: u32 },

    #[error("warmup_steps ({warmup}) exceeds total training steps ({total})")]
    WarmupExceedsTotalSteps { warmup: u32, total: u64 },

    #[error("save_steps ({save_steps}) must be in 1..={total} or no checkpoint is ever written")]
    SaveStepsOutOfRange { save_steps: u32, total: u64 },
}

/// The complete batch of failures from one validation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if any error in the batch matches the predicate.
    pub fn contains(&self, pred: impl Fn(&ValidationError) -> bool) -> bool {
        self.0.iter().any(pred)
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msgs: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Validates a configuration against the chosen model, the dataset profile
/// and the currently available resources.
///
/// Deterministic: the same inputs always produce the same verdict and the
/// same error set, in a fixed order.
pub fn validate(
    config: &TrainingConfig,
    entry: &ModelCatalogEntry,
    profile: &DatasetProfile,
    resources: AvailableResources,
) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        errors.push(ValidationError::NonPositive { field: "learning_rate" });
    }
    if config.num_epochs == 0 {
        errors.push(ValidationError::NonPositive { field: "num_epochs" });
    }
    if config.batch_size == 0 {
        errors.push(ValidationError::NonPositive { field: "batch_size" });
    }
    if config.max_length == 0 {
        errors.push(ValidationError::NonPositive { field: "max_length" });
    }
    if config.gradient_accumulation_steps == 0 {
        errors.push(ValidationError::NonPositive { field: "gradient_accumulation_steps" });
    }

    if config.lora_r == 0 {
        errors.push(ValidationError::NonPositive { field: "lora_r" });
    }
    if config.lora_alpha == 0 {
        errors.push(ValidationError::NonPositive { field: "lora_alpha" });
    }
    if config.lora_r > 0 && config.lora_alpha > 0 && config.lora_alpha < config.lora_r {
        errors.push(ValidationError::LoraAlphaBelowRank {
            r: config.lora_r,
            alpha: config.lora_alpha,
        });
    }
    if !(0.0..1.0).contains(&config.lora_dropout) {
        errors.push(ValidationError::DropoutOutOfRange(config.lora_dropout));
    }

    let quant = config.effective_quantization();
    if config.use_quantization && !entry.supports_quantization(quant) {
        errors.push(ValidationError::UnsupportedQuantization {
            model: entry.id.clone(),
            mode: quant,
        });
    }
    if entry.requirements.quantization_required && !config.use_quantization {
        errors.push(ValidationError::QuantizationRequired { model: entry.id.clone() });
    }

    let estimated_mb =
        estimate_peak_memory_mb(entry.size, config.batch_size, config.max_length, quant);
    if estimated_mb > resources.memory_mb {
        errors.push(ValidationError::MemoryExceeded {
            estimated_mb,
            available_mb: resources.memory_mb,
        });
    }

    if config.max_length > entry.requirements.max_context_length {
        errors.push(ValidationError::ContextLengthExceeded {
            max_length: config.max_length,
            limit: entry.requirements.max_context_length,
        });
    }

    let total = config.total_steps(profile.row_count);
    if u64::from(config.warmup_steps) > total {
        errors.push(ValidationError::WarmupExceedsTotalSteps {
            warmup: config.warmup_steps,
            total,
        });
    }
    if config.save_steps == 0 || u64::from(config.save_steps) > total {
        errors.push(ValidationError::SaveStepsOutOfRange {
            save_steps: config.save_steps,
            total,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}
