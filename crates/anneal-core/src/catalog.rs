//! Registry of available base models and their capability metadata.
//!
//! The catalog is an explicitly constructed, injected registry: it is seeded
//! once at startup from [`builtin_entries`] (or an administrative reseed) and
//! is read-mostly afterwards. Reads never block other readers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Approximate model scale, used by the memory estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// ~125M parameters (e.g. gpt2, distilled encoders).
    M125,
    /// ~250M parameters (e.g. flan-t5-base).
    M250,
    /// ~1B parameters (e.g. tinyllama-1.1b).
    B1,
    /// ~3B parameters (e.g. phi-2).
    B3,
    /// ~7B parameters (e.g. mistral-7b, llama-2-7b).
    B7,
    /// ~13B parameters.
    B13,
}

impl SizeClass {
    /// Approximate parameter count in billions.
    #[must_use]
    pub fn params_billions(self) -> f64 {
        match self {
            Self::M125 => 0.125,
            Self::M250 => 0.25,
            Self::B1 => 1.1,
            Self::B3 => 2.7,
            Self::B7 => 7.0,
            Self::B13 => 13.0,
        }
    }
}

/// Weight precision used during fine-tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantizationMode {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "4bit")]
    FourBit,
    #[serde(rename = "8bit")]
    EightBit,
}

impl std::fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::FourBit => "4bit",
            Self::EightBit => "8bit",
        };
        f.write_str(s)
    }
}

/// Task families a base model can be fine-tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    TextGeneration,
    Summarization,
    Chat,
    Classification,
    QuestionAnswering,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TextGeneration => "text-generation",
            Self::Summarization => "summarization",
            Self::Chat => "chat",
            Self::Classification => "classification",
            Self::QuestionAnswering => "question-answering",
        };
        f.write_str(s)
    }
}

/// Hard requirements a fine-tuning configuration must satisfy for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequirements {
    /// Minimum accelerator memory to train this model at all, in MB.
    pub min_memory_mb: u64,
    /// Quantization modes the model's training recipe supports.
    pub supported_quantization: Vec<QuantizationMode>,
    /// Maximum sequence length the architecture accepts.
    pub max_context_length: u32,
    /// Whether the model cannot be trained unquantized on commodity hardware.
    pub quantization_required: bool,
}

/// One base model available for fine-tuning. Immutable once seeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub name: String,
    /// Registry the weights come from (e.g. "huggingface").
    pub source: String,
    pub hf_model_id: Option<String>,
    pub size: SizeClass,
    pub task_types: Vec<TaskType>,
    pub requirements: ModelRequirements,
    pub description: String,
}

impl ModelCatalogEntry {
    #[must_use]
    pub fn supports_task(&self, task: TaskType) -> bool {
        self.task_types.contains(&task)
    }

    #[must_use]
    pub fn supports_quantization(&self, mode: QuantizationMode) -> bool {
        self.requirements.supported_quantization.contains(&mode)
    }
}

/// Read-mostly model registry.
///
/// Writes only happen through [`ModelCatalog::seed`] at startup or reseed and
/// are serialized by the write lock; concurrent job creation only takes read
/// locks.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    entries: RwLock<HashMap<String, ModelCatalogEntry>>,
}

impl ModelCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Creates a catalog pre-seeded with the built-in model list.
    #[must_use]
    pub fn with_builtin_entries() -> Self {
        let catalog = Self::new();
        catalog.seed(builtin_entries());
        catalog
    }

    /// Idempotent upsert by id. Re-seeding the same entries is a no-op.
    pub fn seed(&self, entries: Vec<ModelCatalogEntry>) {
        let mut map = self.entries.write().expect("catalog lock poisoned");
        for entry in entries {
            debug!(model_id = %entry.id, "Seeding catalog entry");
            map.insert(entry.id.clone(), entry);
        }
    }

    pub fn get(&self, id: &str) -> CoreResult<ModelCatalogEntry> {
        let map = self.entries.read().expect("catalog lock poisoned");
        map.get(id).cloned().ok_or_else(|| CoreError::not_found("model", id))
    }

    /// All entries, ordered by id for deterministic listings.
    #[must_use]
    pub fn list(&self) -> Vec<ModelCatalogEntry> {
        let map = self.entries.read().expect("catalog lock poisoned");
        let mut entries: Vec<_> = map.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("catalog lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Static built-in model list, seeded once at process start.
#[must_use]
pub fn builtin_entries() -> Vec<ModelCatalogEntry> {
    use QuantizationMode::{EightBit, FourBit, None as NoQuant};
    use TaskType::{Chat, Classification, QuestionAnswering, Summarization, TextGeneration};

    vec![
        ModelCatalogEntry {
            id: "gpt2".to_string(),
            name: "GPT-2".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("gpt2".to_string()),
            size: SizeClass::M125,
            task_types: vec![TextGeneration],
            requirements: ModelRequirements {
                min_memory_mb: 2_048,
                supported_quantization: vec![NoQuant, EightBit],
                max_context_length: 1_024,
                quantization_required: false,
            },
            description: "Small general-purpose text generation model, fast to \
                          fine-tune on tiny datasets"
                .to_string(),
        },
        ModelCatalogEntry {
            id: "flan-t5-base".to_string(),
            name: "FLAN-T5 Base".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("google/flan-t5-base".to_string()),
            size: SizeClass::M250,
            task_types: vec![Summarization, QuestionAnswering, Classification],
            requirements: ModelRequirements {
                min_memory_mb: 2_048,
                supported_quantization: vec![NoQuant, EightBit],
                max_context_length: 512,
                quantization_required: false,
            },
            description: "Instruction-tuned encoder-decoder, strong at summarization \
                          and question answering on modest hardware"
                .to_string(),
        },
        ModelCatalogEntry {
            id: "tinyllama-1.1b".to_string(),
            name: "TinyLlama 1.1B".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("TinyLlama/TinyLlama-1.1B-Chat-v1.0".to_string()),
            size: SizeClass::B1,
            task_types: vec![TextGeneration, Chat],
            requirements: ModelRequirements {
                min_memory_mb: 4_096,
                supported_quantization: vec![NoQuant, FourBit, EightBit],
                max_context_length: 2_048,
                quantization_required: false,
            },
            description: "Compact chat model, good quality-to-cost trade-off for \
                          conversational fine-tunes"
                .to_string(),
        },
        ModelCatalogEntry {
            id: "phi-2".to_string(),
            name: "Phi-2".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("microsoft/phi-2".to_string()),
            size: SizeClass::B3,
            task_types: vec![TextGeneration, QuestionAnswering, Chat],
            requirements: ModelRequirements {
                min_memory_mb: 8_192,
                supported_quantization: vec![NoQuant, FourBit, EightBit],
                max_context_length: 2_048,
                quantization_required: false,
            },
            description: "Mid-size reasoning model, strong question answering for \
                          its parameter count"
                .to_string(),
        },
        ModelCatalogEntry {
            id: "llama-2-7b".to_string(),
            name: "Llama 2 7B".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("meta-llama/Llama-2-7b-hf".to_string()),
            size: SizeClass::B7,
            task_types: vec![TextGeneration, Chat],
            requirements: ModelRequirements {
                min_memory_mb: 16_384,
                supported_quantization: vec![FourBit, EightBit],
                max_context_length: 4_096,
                quantization_required: true,
            },
            description: "General-purpose 7B chat and text generation base, requires \
                          quantization on commodity accelerators"
                .to_string(),
        },
        ModelCatalogEntry {
            id: "mistral-7b".to_string(),
            name: "Mistral 7B".to_string(),
            source: "huggingface".to_string(),
            hf_model_id: Some("mistralai/Mistral-7B-v0.1".to_string()),
            size: SizeClass::B7,
            task_types: vec![TextGeneration, Chat, Summarization],
            requirements: ModelRequirements {
                min_memory_mb: 16_384,
                supported_quantization: vec![FourBit, EightBit],
                max_context_length: 8_192,
                quantization_required: true,
            },
            description: "High-quality 7B base with long context, well suited to \
                          summarization and chat fine-tunes"
                .to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_idempotent() {
        let catalog = ModelCatalog::new();
        catalog.seed(builtin_entries());
        let count = catalog.len();
        catalog.seed(builtin_entries());
        assert_eq!(catalog.len(), count);
    }

    #[test]
    fn test_get_unknown_model_is_not_found() {
        let catalog = ModelCatalog::with_builtin_entries();
        let err = catalog.get("no-such-model").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "model", .. }));
    }

    #[test]
    fn test_list_is_sorted_by_id() {
        let catalog = ModelCatalog::with_builtin_entries();
        let ids: Vec<_> = catalog.list().into_iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_quantization_mode_serde_names() {
        assert_eq!(serde_json::to_string(&QuantizationMode::FourBit).unwrap(), "\"4bit\"");
        assert_eq!(
            serde_json::from_str::<QuantizationMode>("\"none\"").unwrap(),
            QuantizationMode::None
        );
    }
}
