use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use ragline_core::{
    ChunkPayload, Distance, FusionMethod, IndexedPoint, RagError, RagResult, SearchResult,
    StoredPoint,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::fusion::fuse;

// --- Filters ---

/// Match clause of a field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Match {
    /// Exact, type-sensitive value match.
    Value {
        /// Value the field must equal.
        value: serde_json::Value,
    },
    /// Full-text match against a text field.
    Text {
        /// Query text.
        text: String,
    },
}

/// Condition on one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    /// Payload field name.
    pub key: String,
    /// Match clause.
    #[serde(rename = "match")]
    pub matcher: Match,
}

impl FieldCondition {
    /// `key == value`.
    pub fn match_value(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            matcher: Match::Value {
                value: value.into(),
            },
        }
    }

    /// Full-text match of `text` against `key`.
    pub fn match_text(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            matcher: Match::Text { text: text.into() },
        }
    }
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// All of these must hold.
    pub must: Vec<FieldCondition>,
}

impl Filter {
    /// Filter with a single condition.
    pub fn must(condition: FieldCondition) -> Self {
        Self {
            must: vec![condition],
        }
    }

    /// Adds a condition. Chainable.
    pub fn and(mut self, condition: FieldCondition) -> Self {
        self.must.push(condition);
        self
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }
}

/// One branch of a fused query: a vector search under an optional filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefetch {
    /// Query vector.
    pub vector: Vec<f32>,
    /// Restricts candidate points.
    pub filter: Option<Filter>,
    /// Candidates this branch contributes.
    pub limit: usize,
}

/// Kind of payload index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadIndex {
    /// Exact-value index.
    Keyword,
    /// Word-tokenized, lower-cased full-text index with phrase matching.
    Text,
}

/// Collection metadata reported by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    /// Fixed vector size of the collection.
    pub vector_size: usize,
    /// Similarity metric.
    pub distance: Distance,
    /// Number of stored points.
    pub points_count: u64,
    /// Number of stored vectors, when the store reports it.
    pub vectors_count: Option<u64>,
    /// Store-reported status.
    pub status: String,
}

/// Trait for vector database backends.
///
/// These are the raw store primitives; collection policy (recreate, payload
/// indexes, dimension checks) lives in
/// [`CollectionGateway`](crate::gateway::CollectionGateway).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection. Fails with a message containing
    /// `already exists` if it does.
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> RagResult<()>;

    /// Delete a collection.
    async fn delete_collection(&self, name: &str) -> RagResult<()>;

    /// Index a payload field.
    async fn create_payload_index(
        &self,
        name: &str,
        field: &str,
        index: PayloadIndex,
    ) -> RagResult<()>;

    /// Collection metadata.
    async fn collection_info(&self, name: &str) -> RagResult<CollectionInfo>;

    /// Insert or overwrite points by id. All-or-nothing.
    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> RagResult<()>;

    /// Up to `limit` points matching `filter`, without vectors.
    async fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> RagResult<Vec<StoredPoint>>;

    /// Points by id; unknown ids are omitted.
    async fn retrieve(
        &self,
        name: &str,
        ids: &[u64],
        with_vectors: bool,
    ) -> RagResult<Vec<StoredPoint>>;

    /// Nearest neighbours of `vector`.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>>;

    /// Runs every prefetch branch and fuses the candidates.
    ///
    /// Stores without a fused-query primitive keep this default, which
    /// reports [`RagError::Unsupported`].
    async fn query_fused(
        &self,
        name: &str,
        prefetch: &[Prefetch],
        fusion: FusionMethod,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        let _ = (name, prefetch, limit, score_threshold);
        Err(RagError::Unsupported(format!("fused {fusion} queries")))
    }
}

// --- In-memory store ---

struct MemCollection {
    vector_size: usize,
    distance: Distance,
    points: BTreeMap<u64, IndexedPoint>,
    indexes: HashMap<String, PayloadIndex>,
}

impl MemCollection {
    fn matches(&self, payload: &ChunkPayload, filter: Option<&Filter>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        if filter.is_empty() {
            return true;
        }
        let Ok(fields) = serde_json::to_value(payload) else {
            return false;
        };
        filter.must.iter().all(|cond| {
            let Some(field) = fields.get(&cond.key) else {
                return false;
            };
            match &cond.matcher {
                Match::Value { value } => field == value,
                Match::Text { text } => {
                    let Some(haystack) = field.as_str() else {
                        return false;
                    };
                    if self.indexes.get(&cond.key) == Some(&PayloadIndex::Text) {
                        let words: HashSet<String> = tokenize(haystack).collect();
                        let mut query = tokenize(text).peekable();
                        query.peek().is_some() && query.all(|w| words.contains(&w))
                    } else {
                        haystack.contains(text.as_str())
                    }
                }
            }
        })
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            Distance::Cosine => cosine_similarity(a, b),
            Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Distance::Euclid => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Orders scores best-first for this collection's metric.
    fn sort_best_first(&self, results: &mut [SearchResult]) {
        let ascending = self.distance == Distance::Euclid;
        results.sort_by(|a, b| {
            let ord = a
                .score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal);
            let ord = if ascending { ord } else { ord.reverse() };
            ord.then(a.id.cmp(&b.id))
        });
    }

    fn passes(&self, score: f32, threshold: Option<f32>) -> bool {
        match threshold {
            None => true,
            Some(t) if self.distance == Distance::Euclid => score <= t,
            Some(t) => score >= t,
        }
    }

    fn search(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        if vector.len() != self.vector_size {
            return Err(RagError::DimensionMismatch {
                expected: self.vector_size,
                actual: vector.len(),
            });
        }
        let mut results: Vec<SearchResult> = self
            .points
            .values()
            .filter(|p| self.matches(&p.payload, filter))
            .map(|p| SearchResult {
                id: p.id,
                score: self.score(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|r| self.passes(r.score, threshold))
            .collect();
        self.sort_best_first(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

/// Lower-cased word tokens, as a word-tokenized text index sees them.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// In-memory vector store using brute-force similarity.
///
/// Implements every store primitive, including fused queries and full-text
/// matching on text-indexed fields, so pipelines can run without a server.
/// Suitable for tests and small datasets.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(name: &str) -> RagError {
    RagError::Store(format!("Collection `{name}` doesn't exist"))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(RagError::Store(format!(
                "Collection `{name}` already exists!"
            )));
        }
        collections.insert(
            name.to_string(),
            MemCollection {
                vector_size,
                distance,
                points: BTreeMap::new(),
                indexes: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing(name))
    }

    async fn create_payload_index(
        &self,
        name: &str,
        field: &str,
        index: PayloadIndex,
    ) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        collection.indexes.insert(field.to_string(), index);
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> RagResult<CollectionInfo> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        let count = collection.points.len() as u64;
        Ok(CollectionInfo {
            vector_size: collection.vector_size,
            distance: collection.distance,
            points_count: count,
            vectors_count: Some(count),
            status: "green".to_string(),
        })
    }

    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != collection.vector_size) {
            return Err(RagError::DimensionMismatch {
                expected: collection.vector_size,
                actual: bad.vector.len(),
            });
        }
        for point in points {
            collection.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> RagResult<Vec<StoredPoint>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(collection
            .points
            .values()
            .filter(|p| collection.matches(&p.payload, filter))
            .take(limit)
            .map(|p| StoredPoint {
                id: p.id,
                payload: p.payload.clone(),
                vector: None,
            })
            .collect())
    }

    async fn retrieve(
        &self,
        name: &str,
        ids: &[u64],
        with_vectors: bool,
    ) -> RagResult<Vec<StoredPoint>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(ids
            .iter()
            .filter_map(|id| collection.points.get(id))
            .map(|p| StoredPoint {
                id: p.id,
                payload: p.payload.clone(),
                vector: with_vectors.then(|| p.vector.clone()),
            })
            .collect())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        collection.search(vector, filter, limit, score_threshold)
    }

    async fn query_fused(
        &self,
        name: &str,
        prefetch: &[Prefetch],
        fusion: FusionMethod,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;

        let mut branches = Vec::with_capacity(prefetch.len());
        for branch in prefetch {
            let mut hits =
                collection.search(&branch.vector, branch.filter.as_ref(), branch.limit, None)?;
            if collection.distance == Distance::Euclid {
                // Fusion expects higher-is-better scores.
                for hit in &mut hits {
                    hit.score = -hit.score;
                }
            }
            branches.push(hits);
        }

        let mut fused = fuse(&branches, fusion, limit);
        if let Some(threshold) = score_threshold {
            fused.retain(|r| r.score >= threshold);
        }
        Ok(fused)
    }
}
