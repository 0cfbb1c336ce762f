use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::types::{Distance, FusionMethod};

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Simultaneous in-flight embedding requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Task type passed to query formatting, e.g. `search` or `qa`.
    #[serde(default = "default_task_type")]
    pub task_type: String,
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub distance: Distance,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

/// Chunking and batching settings for the indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Words per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Words shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Chunks beyond this count are dropped per document.
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_article: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    /// Drop and recreate the collection before indexing.
    #[serde(default)]
    pub recreate: bool,
    /// Format chunk text for the embedding model family instead of the
    /// fixed markdown-title template.
    #[serde(default)]
    pub model_aware_format: bool,
    /// Extra attempts for an embedding batch that failed transiently.
    #[serde(default = "default_embedding_retries")]
    pub embedding_retries: u32,
    /// Base delay of the exponential backoff between those attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default)]
    pub fusion: FusionMethod,
    /// Use hybrid (vector + keyword) retrieval; plain vector search otherwise.
    #[serde(default = "default_true")]
    pub hybrid: bool,
    /// Character budget for retrieved context in RAG prompts.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "embeddinggemma:latest".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_concurrency() -> usize {
    4
}
fn default_task_type() -> String {
    "search".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "articles".to_string()
}
fn default_store_timeout_secs() -> u64 {
    60
}
fn default_chunk_size() -> usize {
    150
}
fn default_chunk_overlap() -> usize {
    30
}
fn default_max_chunks() -> usize {
    10
}
fn default_embedding_batch_size() -> usize {
    20
}
fn default_upsert_batch_size() -> usize {
    100
}
fn default_limit() -> usize {
    10
}
fn default_embedding_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_max_context_chars() -> usize {
    3000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            task_type: default_task_type(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key: None,
            collection: default_collection(),
            distance: Distance::default(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunks_per_article: default_max_chunks(),
            embedding_batch_size: default_embedding_batch_size(),
            upsert_batch_size: default_upsert_batch_size(),
            recreate: false,
            model_aware_format: false,
            embedding_retries: default_embedding_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            min_score: 0.0,
            fusion: FusionMethod::default(),
            hybrid: true,
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> RagResult<()> {
        require_http_url("embedding.base_url", &self.base_url)?;
        if self.model.trim().is_empty() {
            return Err(RagError::Config("embedding.model is empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(RagError::Config(
                "embedding.concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(RagError::Config(
                "embedding.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl StoreConfig {
    pub fn validate(&self) -> RagResult<()> {
        require_http_url("store.url", &self.url)?;
        if self.collection.trim().is_empty() {
            return Err(RagError::Config("store.collection is empty".to_string()));
        }
        Ok(())
    }
}

impl IndexingConfig {
    /// Checks the chunk window and batch sizes.
    ///
    /// `chunk_overlap >= chunk_size` would give a non-positive slide step and
    /// is rejected here, before any I/O.
    pub fn validate(&self) -> RagResult<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config(
                "indexing.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "indexing.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_chunks_per_article == 0 {
            return Err(RagError::Config(
                "indexing.max_chunks_per_article must be at least 1".to_string(),
            ));
        }
        if self.embedding_batch_size == 0 || self.upsert_batch_size == 0 {
            return Err(RagError::Config(
                "indexing batch sizes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl SearchConfig {
    pub fn validate(&self) -> RagResult<()> {
        if self.limit == 0 {
            return Err(RagError::Config("search.limit must be at least 1".to_string()));
        }
        if !self.min_score.is_finite() {
            return Err(RagError::Config("search.min_score must be finite".to_string()));
        }
        Ok(())
    }
}

fn require_http_url(field: &str, url: &str) -> RagResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(RagError::Config(format!(
            "{field} must be an http(s) URL, got '{url}'"
        )))
    }
}
