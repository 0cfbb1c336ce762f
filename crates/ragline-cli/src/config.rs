use std::path::Path;

use anyhow::Context;
use ragline_agent::ModelConfig;
use ragline_core::{EmbeddingConfig, IndexingConfig, SearchConfig, StoreConfig};
use serde::Deserialize;
use tracing::info;

/// Environment variable overriding `store.api_key`.
pub const QDRANT_API_KEY_ENV: &str = "QDRANT_API_KEY";
/// Environment variable overriding `model.api_key`.
pub const RAGLINE_API_KEY_ENV: &str = "RAGLINE_API_KEY";

/// Contents of `ragline.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaglineConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl RaglineConfig {
    /// Reads `path`. A missing file yields the defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !path.exists() && !required {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: RaglineConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Applies secrets from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(QDRANT_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.store.api_key = Some(key);
        }
        if let Some(key) = lookup(RAGLINE_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.model.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.embedding.validate()?;
        self.store.validate()?;
        self.indexing.validate()?;
        self.search.validate()?;
        self.model.validate()?;
        Ok(())
    }
}
