//! Compute resource model and the peak-memory estimator.

use crate::catalog::{QuantizationMode, SizeClass};
use serde::{Deserialize, Serialize};

/// Compute available for training, as reported by the resource monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableResources {
    pub memory_mb: u64,
    pub accelerator_count: u32,
}

/// Default budget the recommender assumes when proposing a configuration.
pub const FREE_TIER: AvailableResources =
    AvailableResources { memory_mb: 16_384, accelerator_count: 1 };

/// External resource monitor contract.
pub trait ResourceMonitor: Send + Sync {
    fn available_resources(&self) -> AvailableResources;
}

/// Monitor that always reports a fixed budget; used for wiring and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticResources(pub AvailableResources);

impl ResourceMonitor for StaticResources {
    fn available_resources(&self) -> AvailableResources {
        self.0
    }
}

/// Bytes per weight under each quantization mode (fp16 baseline).
fn bytes_per_param(mode: QuantizationMode) -> f64 {
    match mode {
        QuantizationMode::None => 2.0,
        QuantizationMode::EightBit => 1.0,
        QuantizationMode::FourBit => 0.5,
    }
}

/// Estimates peak training memory in MB.
///
/// Empirical linear model with three terms:
/// - weights: `params * bytes_per_param(quant)`,
/// - adapter/optimizer state: a fixed 10% of the fp16 weight footprint
///   (LoRA adapters and their optimizer state are kept in fp16 regardless
///   of base quantization),
/// - activations: linear in `batch_size * max_length`, scaled by a
///   per-token cost that grows with model scale.
///
/// The estimate is deterministic and monotonically non-decreasing in both
/// `batch_size` and `max_length`, so validation verdicts are reproducible.
#[must_use]
pub fn estimate_peak_memory_mb(
    size: SizeClass,
    batch_size: u32,
    max_length: u32,
    quant: QuantizationMode,
) -> u64 {
    let params_b = size.params_billions();
    let weights_mb = params_b * 1_000.0 * bytes_per_param(quant);
    let adapter_mb = params_b * 1_000.0 * 2.0 * 0.10;
    let tokens = f64::from(batch_size) * f64::from(max_length);
    let activations_mb = tokens * 0.25 * (1.0 + params_b.sqrt());
    (weights_mb + adapter_mb + activations_mb).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_deterministic() {
        let a = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::FourBit);
        let b = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::FourBit);
        assert_eq!(a, b);
    }

    #[test]
    fn test_estimate_monotonic_in_batch_and_length() {
        for size in [SizeClass::M125, SizeClass::B1, SizeClass::B7] {
            for quant in
                [QuantizationMode::None, QuantizationMode::FourBit, QuantizationMode::EightBit]
            {
                let base = estimate_peak_memory_mb(size, 2, 256, quant);
                assert!(estimate_peak_memory_mb(size, 4, 256, quant) >= base);
                assert!(estimate_peak_memory_mb(size, 2, 512, quant) >= base);
                assert!(estimate_peak_memory_mb(size, 8, 2048, quant) >= base);
            }
        }
    }

    #[test]
    fn test_quantization_lowers_the_estimate() {
        let full = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::None);
        let eight = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::EightBit);
        let four = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::FourBit);
        assert!(four < eight);
        assert!(eight < full);
    }

    #[test]
    fn test_7b_4bit_fits_where_fp16_does_not() {
        let budget = 8_192;
        let four = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::FourBit);
        let full = estimate_peak_memory_mb(SizeClass::B7, 4, 512, QuantizationMode::None);
        assert!(four <= budget, "4bit estimate {four} should fit in {budget}");
        assert!(full > budget, "fp16 estimate {full} should exceed {budget}");
    }
}
