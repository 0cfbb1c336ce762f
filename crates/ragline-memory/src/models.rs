use ragline_core::RagResult;
use serde::Serialize;

use crate::embedding::{probe_dimension, EmbeddingProvider};
use crate::formatter::{detect_model_format, ModelFormat};

/// Specification of a well-known embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnownModel {
    /// Provider-side model name.
    pub name: &'static str,
    pub display_name: &'static str,
    /// Output dimension.
    pub vector_size: usize,
    /// Longest input, in tokens.
    pub max_sequence_length: usize,
}

impl KnownModel {
    /// Formatting family of this model.
    pub fn format(&self) -> ModelFormat {
        detect_model_format(self.name)
    }
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        name: "embeddinggemma:latest",
        display_name: "Embedding Gemma (Latest)",
        vector_size: 768,
        max_sequence_length: 8192,
    },
    KnownModel {
        name: "bge-m3:567m",
        display_name: "BGE-M3 (567M params)",
        vector_size: 1024,
        max_sequence_length: 8192,
    },
    KnownModel {
        name: "bge-large:latest",
        display_name: "BGE Large (Latest)",
        vector_size: 1024,
        max_sequence_length: 512,
    },
    KnownModel {
        name: "bge-base:latest",
        display_name: "BGE Base (Latest)",
        vector_size: 768,
        max_sequence_length: 512,
    },
    KnownModel {
        name: "all-minilm-l6-v2",
        display_name: "All-MiniLM-L6-v2",
        vector_size: 384,
        max_sequence_length: 256,
    },
    KnownModel {
        name: "all-mpnet-base-v2",
        display_name: "All-MPNet-Base-v2",
        vector_size: 768,
        max_sequence_length: 384,
    },
    KnownModel {
        name: "sentence-transformers/all-MiniLM-L6-v2",
        display_name: "Sentence-T All-MiniLM-L6-v2",
        vector_size: 384,
        max_sequence_length: 256,
    },
    KnownModel {
        name: "sentence-transformers/all-mpnet-base-v2",
        display_name: "Sentence-T All-MPNet-Base-v2",
        vector_size: 768,
        max_sequence_length: 384,
    },
];

/// All models with a known specification.
pub fn known_models() -> &'static [KnownModel] {
    KNOWN_MODELS
}

/// Looks up a model by exact name.
pub fn lookup(name: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS.iter().find(|m| m.name == name)
}

/// Vector size of `model`: from the table when known, otherwise probed.
pub async fn vector_size_or_probe(
    provider: &dyn EmbeddingProvider,
    model: &str,
) -> RagResult<usize> {
    match lookup(model) {
        Some(known) => Ok(known.vector_size),
        None => probe_dimension(provider, model).await,
    }
}
