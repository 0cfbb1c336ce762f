use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use ragline_core::{
    ArticleId, FusionMethod, RagError, RagResult, SearchResult, Stage, StoredPoint,
};
use tracing::{debug, warn};

use crate::store::{FieldCondition, Filter, Prefetch, VectorStore};

/// Most chunks fetched for a single article.
pub const MAX_ARTICLE_CHUNKS: usize = 100;

/// Parameters of one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Raw query text, used by the keyword branches.
    pub text: String,
    /// Embedded (formatted) query.
    pub vector: Vec<f32>,
    /// Results to return.
    pub limit: usize,
    /// Results scoring below this are dropped; `0.0` disables the filter.
    pub min_score: f32,
    /// How hybrid branches are merged.
    pub fusion: FusionMethod,
    /// Restrict results to one article.
    pub article_id: Option<ArticleId>,
}

impl SearchRequest {
    /// A request for `limit` results near `vector`, with no text.
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self {
            text: String::new(),
            vector,
            limit,
            min_score: 0.0,
            fusion: FusionMethod::default(),
            article_id: None,
        }
    }

    /// Sets the keyword-branch text. Chainable.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Sets the score threshold. Chainable.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Sets the fusion method. Chainable.
    pub fn with_fusion(mut self, fusion: FusionMethod) -> Self {
        self.fusion = fusion;
        self
    }

    /// Restricts results to one article. Chainable.
    pub fn within_article(mut self, article_id: ArticleId) -> Self {
        self.article_id = Some(article_id);
        self
    }

    fn threshold(&self) -> Option<f32> {
        (self.min_score > 0.0).then_some(self.min_score)
    }

    fn article_condition(&self) -> Option<FieldCondition> {
        self.article_id
            .as_ref()
            .map(|id| FieldCondition::match_value("article_id", id.to_json()))
    }

    /// The vector branch plus, for non-blank text, the title and content
    /// keyword branches. Each asks for twice the final limit.
    pub fn prefetch(&self) -> Vec<Prefetch> {
        let candidates = self.limit.saturating_mul(2);
        let mut branches = vec![Prefetch {
            vector: self.vector.clone(),
            filter: self.article_condition().map(Filter::must),
            limit: candidates,
        }];

        if !self.text.trim().is_empty() {
            for field in ["title", "content"] {
                let mut filter = Filter::must(FieldCondition::match_text(field, self.text.as_str()));
                if let Some(cond) = self.article_condition() {
                    filter = filter.and(cond);
                }
                branches.push(Prefetch {
                    vector: self.vector.clone(),
                    filter: Some(filter),
                    limit: candidates,
                });
            }
        }
        branches
    }
}

/// Why a hybrid search was served by plain vector search instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The store has no fused-query primitive.
    Unsupported(String),
    /// The fused query was attempted and failed.
    QueryFailed(String),
}

impl FallbackReason {
    fn classify(err: &RagError) -> Self {
        match err {
            RagError::Unsupported(msg) => FallbackReason::Unsupported(msg.clone()),
            other => FallbackReason::QueryFailed(other.to_string()),
        }
    }
}

/// Result of a hybrid search.
#[derive(Debug, Clone, PartialEq)]
pub enum HybridOutcome {
    /// Fused results from all branches.
    Fused(Vec<SearchResult>),
    /// Plain vector results, served after the fused query failed.
    Fallback {
        /// The vector-only results.
        results: Vec<SearchResult>,
        /// What went wrong with the fused query.
        reason: FallbackReason,
    },
}

impl HybridOutcome {
    /// The results, however they were produced.
    pub fn into_results(self) -> Vec<SearchResult> {
        match self {
            HybridOutcome::Fused(results) | HybridOutcome::Fallback { results, .. } => results,
        }
    }

    /// Whether plain vector search served the request.
    pub fn is_fallback(&self) -> bool {
        matches!(self, HybridOutcome::Fallback { .. })
    }
}

/// Hybrid searcher that combines dense vector search with keyword-filtered
/// vector branches, fused by the store.
///
/// Three prefetch branches feed the fusion:
/// - plain vector similarity
/// - vector similarity among points whose `title` matches the query text
/// - vector similarity among points whose `content` matches the query text
///
/// When the fused query fails the searcher retries with plain vector search.
pub struct HybridSearcher {
    store: Arc<dyn VectorStore>,
}

impl HybridSearcher {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Pure vector search with the request's limit, threshold and article
    /// filter. Text and fusion are ignored.
    pub async fn search_simple(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> RagResult<Vec<SearchResult>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let filter = request.article_condition().map(Filter::must);
        let mut results = self
            .store
            .query(
                collection,
                &request.vector,
                filter.as_ref(),
                request.limit,
                request.threshold(),
            )
            .await
            .map_err(|e| match e {
                RagError::DimensionMismatch { .. } => e,
                other => RagError::Search(format!("Simple search failed: {other}")),
            })?;
        apply_min_score(&mut results, request.min_score);
        Ok(results)
    }

    /// Hybrid search reporting whether the fallback was taken.
    pub async fn search_hybrid_outcome(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> RagResult<HybridOutcome> {
        if request.limit == 0 {
            return Ok(HybridOutcome::Fused(Vec::new()));
        }

        let prefetch = request.prefetch();
        let fused = self
            .store
            .query_fused(
                collection,
                &prefetch,
                request.fusion,
                request.limit,
                request.threshold(),
            )
            .await;

        match fused {
            Ok(mut results) => {
                apply_min_score(&mut results, request.min_score);
                debug!(
                    collection,
                    branches = prefetch.len(),
                    fusion = %request.fusion,
                    hits = results.len(),
                    "Hybrid search"
                );
                Ok(HybridOutcome::Fused(results))
            }
            Err(err) => {
                let reason = FallbackReason::classify(&err);
                warn!(
                    collection,
                    error = %err,
                    "Hybrid search failed, falling back to simple search"
                );
                let results = self.search_simple(collection, request).await?;
                Ok(HybridOutcome::Fallback { results, reason })
            }
        }
    }

    /// Hybrid (vector + keyword) search with transparent fallback to
    /// [`search_simple`](Self::search_simple).
    pub async fn search_hybrid(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> RagResult<Vec<SearchResult>> {
        self.search_hybrid_outcome(collection, request)
            .await
            .map(HybridOutcome::into_results)
    }

    /// All chunks of one article (at most [`MAX_ARTICLE_CHUNKS`]), ordered by
    /// `chunk_index`.
    ///
    /// If nothing matches, the id is retried once in its other
    /// representation (`"42"` ⇄ `42`). Unknown articles yield an empty list.
    pub async fn get_article(
        &self,
        collection: &str,
        article_id: &ArticleId,
    ) -> RagResult<Vec<StoredPoint>> {
        let chunks = self.article_chunks(collection, article_id).await?;
        if !chunks.is_empty() {
            return Ok(chunks);
        }
        match article_id.alternate() {
            Some(alt) => {
                debug!(collection, article_id = %article_id, "Retrying article lookup with alternate id type");
                self.article_chunks(collection, &alt).await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn article_chunks(
        &self,
        collection: &str,
        article_id: &ArticleId,
    ) -> RagResult<Vec<StoredPoint>> {
        let filter = Filter::must(FieldCondition::match_value("article_id", article_id.to_json()));
        let mut chunks = self
            .store
            .scroll(collection, Some(&filter), MAX_ARTICLE_CHUNKS)
            .await
            .map_err(|e| {
                RagError::Search(format!("Failed to retrieve article {article_id}: {e}"))
            })?;
        chunks.sort_by_key(|p| p.payload.chunk_index);
        Ok(chunks)
    }

    /// Up to `limit` points nearest to the stored vector of `point_id`,
    /// excluding the point itself. An unknown point yields an empty list.
    pub async fn find_similar(
        &self,
        collection: &str,
        point_id: u64,
        limit: usize,
    ) -> RagResult<Vec<SearchResult>> {
        let points = self
            .store
            .retrieve(collection, &[point_id], true)
            .await
            .map_err(|e| e.in_stage(Stage::Searching))?;
        let Some(vector) = points.into_iter().find_map(|p| p.vector) else {
            return Ok(Vec::new());
        };

        let request = SearchRequest::new(vector, limit.saturating_add(1));
        let mut results = self.search_simple(collection, &request).await?;
        results.retain(|r| r.id != point_id);
        results.truncate(limit);
        Ok(results)
    }
}

fn apply_min_score(results: &mut Vec<SearchResult>, min_score: f32) {
    if min_score > 0.0 {
        results.retain(|r| r.score >= min_score);
    }
}

/// Groups results by `article_id`, each group ordered by `chunk_index`.
pub fn group_by_article(results: &[SearchResult]) -> HashMap<ArticleId, Vec<SearchResult>> {
    let mut groups: HashMap<ArticleId, Vec<SearchResult>> = HashMap::new();
    for result in results {
        groups
            .entry(result.payload.article_id.clone())
            .or_default()
            .push(result.clone());
    }
    for members in groups.values_mut() {
        members.sort_by_key(|r| r.payload.chunk_index);
    }
    groups
}

/// Orders groups by their best member score, highest first; ties by
/// article id.
pub fn rank_groups(
    groups: HashMap<ArticleId, Vec<SearchResult>>,
) -> Vec<(ArticleId, Vec<SearchResult>)> {
    let best = |members: &[SearchResult]| {
        members
            .iter()
            .map(|r| r.score)
            .fold(f32::NEG_INFINITY, f32::max)
    };
    let mut ranked: Vec<(ArticleId, Vec<SearchResult>)> = groups.into_iter().collect();
    ranked.sort_by(|(a_id, a), (b_id, b)| {
        best(b)
            .partial_cmp(&best(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_id.cmp(b_id))
    });
    ranked
}
