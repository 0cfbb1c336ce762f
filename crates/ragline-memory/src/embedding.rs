use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use ragline_core::{EmbeddingConfig, RagError, RagResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Text embedded once to learn a model's output dimension.
pub const DIMENSION_PROBE_TEXT: &str = "dimension probe";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A model advertised by an embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderModel {
    /// Model name, including any tag.
    pub name: String,
    /// Size on disk in bytes, when reported.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding of `text` with `model`.
    async fn embed(&self, text: &str, model: &str) -> RagResult<Vec<f32>>;

    /// Compute embeddings for `texts` with at most `concurrency` requests in
    /// flight.
    ///
    /// Output order matches input order regardless of completion order. The
    /// first failure aborts the whole call and names the failing index.
    async fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        concurrency: usize,
    ) -> RagResult<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let model = model.to_string();
        let mut pending = stream::iter(texts.iter().cloned().enumerate())
            .map(|(index, text)| {
                let model = model.clone();
                async move { (index, self.embed(&text, &model).await) }
            })
            .buffer_unordered(concurrency.max(1));

        while let Some((index, result)) = pending.next().await {
            match result {
                Ok(vector) => slots[index] = Some(vector),
                Err(e) => {
                    return Err(RagError::Embedding(format!(
                        "Failed to embed text at index {index}: {e}"
                    )))
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    RagError::Embedding(format!("No embedding produced for text at index {index}"))
                })
            })
            .collect()
    }

    /// Whether the provider is reachable.
    async fn health_check(&self) -> bool {
        true
    }

    /// Models the provider can serve.
    async fn list_models(&self) -> RagResult<Vec<ProviderModel>> {
        Ok(Vec::new())
    }
}

/// Learns a model's vector size by embedding [`DIMENSION_PROBE_TEXT`].
pub async fn probe_dimension(provider: &dyn EmbeddingProvider, model: &str) -> RagResult<usize> {
    let vector = provider.embed(DIMENSION_PROBE_TEXT, model).await?;
    if vector.is_empty() {
        return Err(RagError::Embedding(format!(
            "model '{model}' returned an empty probe vector"
        )));
    }
    debug!(model, dimension = vector.len(), "Probed embedding dimension");
    Ok(vector.len())
}

/// Ollama embedding client.
///
/// Tries the legacy `/api/embeddings` shape (`prompt` in, `embedding` out)
/// first, then `/api/embed` (`input` in, `embeddings` out). One pooled HTTP
/// client is reused for every request.
pub struct OllamaEmbedding {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

impl EmbedResponse {
    fn into_vector(self) -> Option<Vec<f32>> {
        if let Some(v) = self.embedding.filter(|v| !v.is_empty()) {
            return Some(v);
        }
        self.embeddings
            .and_then(|list| list.into_iter().next())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ProviderModel>,
}

impl OllamaEmbedding {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RagResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client from the `[embedding]` configuration section.
    pub fn from_config(config: &EmbeddingConfig) -> RagResult<Self> {
        config.validate()?;
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn try_shape(&self, url: &str, body: serde_json::Value) -> Result<Vec<f32>, String> {
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("{url} returned {status}: {text}"));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| format!("reading {url} response failed: {e}"))?;
        let parsed: EmbedResponse = serde_json::from_str(&text)
            .map_err(|e| format!("invalid JSON from {url}: {e}"))?;
        parsed
            .into_vector()
            .ok_or_else(|| format!("Unexpected response: {text}"))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str, model: &str) -> RagResult<Vec<f32>> {
        let attempts = [
            (
                format!("{}/api/embeddings", self.base_url),
                serde_json::json!({ "model": model, "prompt": text }),
            ),
            (
                format!("{}/api/embed", self.base_url),
                serde_json::json!({ "model": model, "input": text }),
            ),
        ];

        let mut last_err = String::from("no request shape attempted");
        for (url, body) in attempts {
            match self.try_shape(&url, body).await {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    debug!(url = %url, model, error = %e, "Embedding request shape failed");
                    last_err = e;
                }
            }
        }
        Err(RagError::Embedding(format!(
            "Ollama embedding failed. Last error: {last_err}"
        )))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> RagResult<Vec<ProviderModel>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()).in_stage(ragline_core::Stage::Embedding))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RagError::Embedding(format!(
                "listing models failed with {status}"
            )));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid model list: {e}")))?;
        Ok(tags.models)
    }
}

/// Local bag-of-words embedding (no external service needed).
///
/// Words are hashed into a fixed number of dimensions weighted by term
/// frequency and the result is L2-normalized, so texts sharing words land
/// close together. The model name is ignored.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Dimension of every produced vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str, _model: &str) -> RagResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("Cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1)
            .collect();
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(*word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            vector[fnv1a(bytes, 0) as usize % self.dimension] += tf;
            vector[fnv1a(bytes, 1) as usize % self.dimension] += tf * 0.7;
            vector[fnv1a(bytes, 2) as usize % self.dimension] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// FNV-1a over `data` followed by a salt byte (skipped when zero).
fn fnv1a(data: &[u8], salt: u8) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    let salt_bytes: &[u8] = if salt == 0 { &[] } else { std::slice::from_ref(&salt) };
    for &byte in data.iter().chain(salt_bytes) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}
