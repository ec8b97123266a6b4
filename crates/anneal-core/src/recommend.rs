//! Model and configuration recommendation.
//!
//! An independent read path over the catalog plus dataset statistics. The
//! scoring is fully deterministic: the reasoning string is assembled from the
//! factors that won, ties break on the lowest model id, and the weights are
//! an injectable parameter set rather than hard-coded constants.

use crate::catalog::{ModelCatalog, ModelCatalogEntry, QuantizationMode, TaskType};
use crate::config::TrainingConfig;
use crate::dataset::{infer_task_type, DatasetProfile};
use crate::error::{CoreError, CoreResult};
use crate::resources::{estimate_peak_memory_mb, FREE_TIER};
use crate::validator::validate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A proposed model + starting configuration. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub model: ModelCatalogEntry,
    pub config: TrainingConfig,
    pub reasoning: String,
    /// Remaining candidates, best first.
    pub alternatives: Vec<ModelCatalogEntry>,
}

/// Relative weights of the three scoring factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendWeights {
    pub dataset_fit: f64,
    pub goal_match: f64,
    pub resource_headroom: f64,
}

impl Default for RecommendWeights {
    fn default() -> Self {
        Self { dataset_fit: 0.4, goal_match: 0.35, resource_headroom: 0.25 }
    }
}

/// How many alternatives to return alongside the winner.
const MAX_ALTERNATIVES: usize = 3;

/// Model scales above this are recommended with quantization enabled.
const QUANTIZE_ABOVE_PARAMS_B: f64 = 2.0;

/// Sequence-length buckets a recommended max_length is rounded up to.
const LENGTH_BUCKETS: [u32; 5] = [128, 256, 512, 1_024, 2_048];

/// Recommends a model and a starting configuration for a goal and dataset.
///
/// Filters the catalog by task type (inferred from the dataset's column
/// shapes when the caller didn't state one), scores the remaining candidates,
/// then derives a default configuration from the winner's requirements. If
/// the derived configuration fails validation against the free-tier budget,
/// the most conservative legal configuration for that model is used instead.
pub fn recommend(
    catalog: &ModelCatalog,
    weights: RecommendWeights,
    goal: Option<&str>,
    profile: &DatasetProfile,
    task_type: Option<TaskType>,
) -> CoreResult<Recommendation> {
    let task = task_type.or_else(|| infer_task_type(profile)).ok_or_else(|| {
        CoreError::InvalidState(
            "task type was not given and could not be inferred from the dataset".to_string(),
        )
    })?;

    let mut scored: Vec<(f64, ScoreBreakdown, ModelCatalogEntry)> = catalog
        .list()
        .into_iter()
        .filter(|entry| entry.supports_task(task))
        .map(|entry| {
            let breakdown = score_entry(&entry, goal, profile);
            let total = weights.dataset_fit * breakdown.dataset_fit
                + weights.goal_match * breakdown.goal_match
                + weights.resource_headroom * breakdown.resource_headroom;
            (total, breakdown, entry)
        })
        .collect();

    if scored.is_empty() {
        return Err(CoreError::NoCandidate { task: task.to_string() });
    }

    // Highest score first; equal scores fall back to lowest id.
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.2.id.cmp(&b.2.id))
    });

    let (score, breakdown, winner) = scored.remove(0);
    let alternatives: Vec<ModelCatalogEntry> =
        scored.into_iter().take(MAX_ALTERNATIVES).map(|(_, _, e)| e).collect();

    let mut config = derive_config(&winner, profile);
    let mut fell_back = false;
    if validate(&config, &winner, profile, FREE_TIER).is_err() {
        config = conservative_config(&winner, profile);
        fell_back = true;
    }

    let estimated_mb = estimate_peak_memory_mb(
        winner.size,
        config.batch_size,
        config.max_length,
        config.effective_quantization(),
    );
    debug!(model_id = %winner.id, score, estimated_mb, "Recommendation selected");

    let mut reasoning = format!(
        "selected {id} for task '{task}': dataset fit {df:.2} ({rows} rows), \
         goal match {gm:.2}, resource headroom {rh:.2}; estimated peak memory \
         {estimated_mb} MB within the {budget} MB default budget",
        id = winner.id,
        df = breakdown.dataset_fit,
        gm = breakdown.goal_match,
        rh = breakdown.resource_headroom,
        rows = profile.row_count,
        budget = FREE_TIER.memory_mb,
    );
    if fell_back {
        reasoning.push_str("; derived configuration failed validation, using the most \
                            conservative legal configuration instead");
    }

    Ok(Recommendation { model: winner, config, reasoning, alternatives })
}

#[derive(Debug, Clone, Copy)]
struct ScoreBreakdown {
    dataset_fit: f64,
    goal_match: f64,
    resource_headroom: f64,
}

fn score_entry(
    entry: &ModelCatalogEntry,
    goal: Option<&str>,
    profile: &DatasetProfile,
) -> ScoreBreakdown {
    ScoreBreakdown {
        dataset_fit: dataset_fit_score(entry, profile.row_count),
        goal_match: goal.map_or(0.0, |g| goal_match_score(entry, g)),
        resource_headroom: headroom_score(entry),
    }
}

/// Fit of model scale to dataset size: small datasets can't feed large
/// models, large datasets are wasted on tiny ones.
fn dataset_fit_score(entry: &ModelCatalogEntry, rows: u64) -> f64 {
    let params = entry.size.params_billions();
    match rows {
        0..=999 => {
            if params <= 0.5 {
                1.0
            } else if params <= 1.5 {
                0.8
            } else if params <= 3.0 {
                0.5
            } else {
                0.3
            }
        }
        1_000..=99_999 => {
            if params <= 0.5 {
                0.5
            } else if params <= 3.0 {
                1.0
            } else {
                0.7
            }
        }
        _ => {
            if params <= 0.5 {
                0.2
            } else if params <= 3.0 {
                0.6
            } else {
                1.0
            }
        }
    }
}

/// Fraction of meaningful goal words found in the model's name/description.
fn goal_match_score(entry: &ModelCatalogEntry, goal: &str) -> f64 {
    let haystack = format!("{} {}", entry.name, entry.description).to_lowercase();
    let words: Vec<&str> = goal
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| haystack.contains(&w.to_lowercase())).count();
    hits as f64 / words.len() as f64
}

/// Headroom of the model's default-config footprint against the free tier.
fn headroom_score(entry: &ModelCatalogEntry) -> f64 {
    let cfg = derive_config(entry, &DatasetProfile {
        row_count: 0,
        column_schema: Vec::new(),
        token_lengths: crate::dataset::TokenLengthStats { mean: 0.0, p95: 0, max: 0 },
    });
    let estimated = estimate_peak_memory_mb(
        entry.size,
        cfg.batch_size,
        cfg.max_length,
        cfg.effective_quantization(),
    ) as f64;
    (1.0 - estimated / FREE_TIER.memory_mb as f64).clamp(0.0, 1.0)
}

/// Smallest bucket covering the dataset's 95th-percentile token length,
/// capped at the model's context limit.
fn derive_max_length(entry: &ModelCatalogEntry, profile: &DatasetProfile) -> u32 {
    let observed = profile.token_lengths.p95.max(profile.token_lengths.mean.ceil() as u64);
    let bucket = LENGTH_BUCKETS
        .iter()
        .copied()
        .find(|b| u64::from(*b) >= observed)
        .unwrap_or(LENGTH_BUCKETS[LENGTH_BUCKETS.len() - 1]);
    bucket.min(entry.requirements.max_context_length)
}

fn pick_quantization(entry: &ModelCatalogEntry) -> (bool, QuantizationMode) {
    let wants_quant = entry.requirements.quantization_required
        || entry.size.params_billions() > QUANTIZE_ABOVE_PARAMS_B;
    if !wants_quant {
        return (false, QuantizationMode::None);
    }
    if entry.supports_quantization(QuantizationMode::FourBit) {
        (true, QuantizationMode::FourBit)
    } else if entry.supports_quantization(QuantizationMode::EightBit) {
        (true, QuantizationMode::EightBit)
    } else {
        (false, QuantizationMode::None)
    }
}

/// Default starting configuration derived from the model's requirements and
/// the dataset profile.
fn derive_config(entry: &ModelCatalogEntry, profile: &DatasetProfile) -> TrainingConfig {
    let (use_quantization, quantization_type) = pick_quantization(entry);
    let mut config = TrainingConfig {
        max_length: derive_max_length(entry, profile),
        use_quantization,
        quantization_type,
        ..TrainingConfig::default()
    };
    // Keep warmup and checkpoint cadence inside the step budget of small
    // datasets.
    let total = config.total_steps(profile.row_count);
    if total > 0 {
        config.warmup_steps = config.warmup_steps.min((total / 10) as u32);
        config.save_steps = config.save_steps.min(total as u32).max(1);
    }
    config
}

/// The most conservative legal configuration for a model: smallest batch,
/// strongest supported quantization, no warmup.
fn conservative_config(entry: &ModelCatalogEntry, profile: &DatasetProfile) -> TrainingConfig {
    let (use_quantization, quantization_type) =
        if entry.supports_quantization(QuantizationMode::FourBit) {
            (true, QuantizationMode::FourBit)
        } else if entry.supports_quantization(QuantizationMode::EightBit) {
            (true, QuantizationMode::EightBit)
        } else {
            (false, QuantizationMode::None)
        };
    let mut config = TrainingConfig {
        batch_size: 1,
        gradient_accumulation_steps: 1,
        max_length: derive_max_length(entry, profile)
            .min(512)
            .min(entry.requirements.max_context_length),
        use_quantization,
        quantization_type,
        warmup_steps: 0,
        ..TrainingConfig::default()
    };
    let total = config.total_steps(profile.row_count);
    if total > 0 {
        config.save_steps = config.save_steps.min(total as u32).max(1);
    }
    config
}
