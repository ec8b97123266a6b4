//! Fine-tuning configuration value object.

use crate::catalog::QuantizationMode;
use serde::{Deserialize, Serialize};

/// LoRA/quantization training recipe for one job.
///
/// A `TrainingConfig` is embedded into a job at creation time and never
/// mutated afterwards; re-running with different settings requires a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub num_epochs: u32,
    pub batch_size: u32,
    pub max_length: u32,
    pub lora_r: u32,
    pub lora_alpha: u32,
    pub lora_dropout: f64,
    pub use_quantization: bool,
    pub quantization_type: QuantizationMode,
    pub gradient_accumulation_steps: u32,
    pub warmup_steps: u32,
    pub save_steps: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 2e-4,
            num_epochs: 3,
            batch_size: 4,
            max_length: 512,
            lora_r: 8,
            lora_alpha: 32,
            lora_dropout: 0.1,
            use_quantization: true,
            quantization_type: QuantizationMode::FourBit,
            gradient_accumulation_steps: 4,
            warmup_steps: 100,
            save_steps: 100,
        }
    }
}

impl TrainingConfig {
    /// The quantization mode actually in effect: `quantization_type` is
    /// ignored when `use_quantization` is off.
    #[must_use]
    pub fn effective_quantization(&self) -> QuantizationMode {
        if self.use_quantization {
            self.quantization_type
        } else {
            QuantizationMode::None
        }
    }

    /// Total optimizer steps for a dataset of `rows` examples:
    /// `ceil(rows / (batch_size * gradient_accumulation_steps)) * num_epochs`.
    ///
    /// Returns 0 when batch size or accumulation is 0; the validator rejects
    /// such configs separately.
    #[must_use]
    pub fn total_steps(&self, rows: u64) -> u64 {
        let denom = u64::from(self.batch_size) * u64::from(self.gradient_accumulation_steps);
        if denom == 0 {
            return 0;
        }
        rows.div_ceil(denom) * u64::from(self.num_epochs)
    }
}
