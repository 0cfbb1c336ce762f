//! Retrieval-augmented answering: search, prompt assembly with a context
//! budget, and generation.

use std::fmt::Write as _;
use std::sync::Arc;

use ragline_core::{
    ArticleId, EmbeddingConfig, RagResult, SearchConfig, SearchResult, Stage, StoreConfig,
};
use ragline_memory::{
    EmbeddingFormatter, EmbeddingProvider, HybridSearcher, SearchRequest, VectorStore,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::backends::GenerationRequest;
use crate::config::ModelConfig;
use crate::llm::LlmClient;
use crate::stream::TextStream;

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions \
based on the provided context. Use the information from the knowledge base to provide accurate, \
helpful responses. If the context doesn't contain enough information to answer the question, \
say so clearly. Keep your responses concise and relevant.";

/// Title shown for chunks whose document has none.
const UNKNOWN_TITLE: &str = "Unknown";

/// One chunk that made it into a prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    /// 1-based position, matching `[Context i]` in the prompt.
    pub index: usize,
    pub title: String,
    pub article_id: ArticleId,
    pub chunk_index: usize,
    pub score: f32,
}

/// Assembles the answer prompt from ranked results.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_context_chars: usize,
    answer_language: Option<String>,
}

impl ContextBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self {
            max_context_chars,
            answer_language: None,
        }
    }

    /// Asks for the answer in `language`. Chainable.
    pub fn with_answer_language(mut self, language: Option<String>) -> Self {
        self.answer_language = language.filter(|l| !l.trim().is_empty());
        self
    }

    /// Builds the prompt and the citations of exactly the chunks it holds.
    ///
    /// Chunks are taken in rank order until the next one would push the
    /// total content length past the budget. The first chunk is always
    /// taken, however long.
    pub fn build(&self, query: &str, results: &[SearchResult]) -> (String, Vec<SourceCitation>) {
        let mut sections = Vec::new();
        let mut sources = Vec::new();
        let mut total = 0usize;

        for (i, result) in results.iter().enumerate() {
            let payload = &result.payload;
            let len = payload.content.chars().count();
            if i > 0 && total + len > self.max_context_chars {
                break;
            }
            total += len;

            let index = i + 1;
            sections.push(format!("[Context {index}]:\n{}", payload.content));
            let title = if payload.title.trim().is_empty() {
                UNKNOWN_TITLE.to_string()
            } else {
                payload.title.clone()
            };
            sources.push(SourceCitation {
                index,
                title,
                article_id: payload.article_id.clone(),
                chunk_index: payload.chunk_index,
                score: result.score,
            });
        }

        let mut prompt = String::from(
            "Based on the following context, please answer the user's question.\n\
             If the context doesn't contain relevant information, please say so.\n\
             Answer directly without describing how the context was used.\n\n",
        );
        let _ = write!(
            prompt,
            "Context:\n{}\n\nUser Question: {query}\n\n\
             Please provide a helpful, detailed and accurate answer based on the context provided.",
            sections.join("\n\n")
        );
        if let Some(language) = &self.answer_language {
            let _ = write!(prompt, " Answer in {language}.");
        }

        (prompt, sources)
    }
}

/// Prompt and citations for `query` with a `max_context_chars` budget.
pub fn build_context(
    query: &str,
    results: &[SearchResult],
    max_context_chars: usize,
) -> (String, Vec<SourceCitation>) {
    ContextBuilder::new(max_context_chars).build(query, results)
}

/// Renders citations for display, one per line.
pub fn format_sources(sources: &[SourceCitation]) -> String {
    sources
        .iter()
        .map(|s| {
            format!(
                "[{}] {} (article {}, chunk {}, score {:.3})",
                s.index, s.title, s.article_id, s.chunk_index, s.score
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Knobs for [`RagOrchestrator`].
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub collection: String,
    pub embedding_model: String,
    /// Task type passed to the query formatter.
    pub task_type: String,
    pub search: SearchConfig,
    pub system_prompt: Option<String>,
    pub answer_language: Option<String>,
}

impl RagSettings {
    pub fn from_config(
        store: &StoreConfig,
        embedding: &EmbeddingConfig,
        search: &SearchConfig,
        model: &ModelConfig,
    ) -> Self {
        Self {
            collection: store.collection.clone(),
            embedding_model: embedding.model.clone(),
            task_type: embedding.task_type.clone(),
            search: search.clone(),
            system_prompt: model.system_prompt.clone(),
            answer_language: model.answer_language.clone(),
        }
    }
}

/// A complete answer with the chunks it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
}

/// A streaming answer: citations up front, text as it is generated.
pub struct RagStream {
    pub sources: Vec<SourceCitation>,
    pub stream: TextStream,
}

/// Search, prompt and generate.
pub struct RagOrchestrator {
    embedder: Arc<dyn EmbeddingProvider>,
    searcher: HybridSearcher,
    llm: LlmClient,
    formatter: EmbeddingFormatter,
    settings: RagSettings,
}

impl RagOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        llm: LlmClient,
        settings: RagSettings,
    ) -> Self {
        Self {
            embedder,
            searcher: HybridSearcher::new(store),
            llm,
            formatter: EmbeddingFormatter::new(),
            settings,
        }
    }

    /// Replaces the query formatter. Chainable.
    pub fn with_formatter(mut self, formatter: EmbeddingFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Embeds `query` and searches the collection, hybrid or vector-only
    /// depending on the settings.
    pub async fn retrieve(
        &self,
        query: &str,
        article_id: Option<ArticleId>,
    ) -> RagResult<Vec<SearchResult>> {
        let model = &self.settings.embedding_model;
        let formatted = self
            .formatter
            .format_query(query, model, &self.settings.task_type);
        let vector = self
            .embedder
            .embed(&formatted, model)
            .await
            .map_err(|e| e.in_stage(Stage::Embedding))?;

        let search = &self.settings.search;
        let mut request = SearchRequest::new(vector, search.limit)
            .with_text(query)
            .with_min_score(search.min_score)
            .with_fusion(search.fusion);
        if let Some(id) = article_id {
            request = request.within_article(id);
        }

        let collection = &self.settings.collection;
        let results = if search.hybrid {
            self.searcher.search_hybrid(collection, &request).await?
        } else {
            self.searcher.search_simple(collection, &request).await?
        };
        info!(collection = %collection, hits = results.len(), hybrid = search.hybrid, "Retrieved context");
        Ok(results)
    }

    /// Retrieves context and builds the generation request.
    async fn prepare(&self, query: &str) -> RagResult<(GenerationRequest, Vec<SourceCitation>)> {
        let results = self.retrieve(query, None).await?;
        let (prompt, sources) = ContextBuilder::new(self.settings.search.max_context_chars)
            .with_answer_language(self.settings.answer_language.clone())
            .build(query, &results);
        debug!(sources = sources.len(), prompt_chars = prompt.len(), "Built prompt");

        let system = self
            .settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Ok((GenerationRequest::new(prompt).with_system_prompt(system), sources))
    }

    /// Answers `query` in one piece.
    pub async fn answer(&self, query: &str) -> RagResult<RagAnswer> {
        let (request, sources) = self.prepare(query).await?;
        let answer = self.llm.generate(&request).await?;
        Ok(RagAnswer { answer, sources })
    }

    /// Answers `query` as a stream of fragments.
    pub async fn answer_stream(&self, query: &str) -> RagResult<RagStream> {
        let (request, sources) = self.prepare(query).await?;
        let stream = self.llm.generate_stream(&request).await?;
        Ok(RagStream { sources, stream })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ragline_core::ChunkPayload;

    fn hit(id: u64, title: &str, content: &str, score: f32) -> SearchResult {
        SearchResult {
            id,
            score,
            payload: ChunkPayload {
                article_id: ArticleId::Int(id as i64),
                chunk_index: 0,
                title: title.into(),
                content: content.into(),
                text: String::new(),
                source: "unknown".into(),
            },
        }
    }

    #[test]
    fn test_first_chunk_always_included() {
        let long = "x".repeat(5000);
        let (prompt, sources) = build_context("q", &[hit(1, "Long", &long, 0.9)], 100);
        assert_eq!(sources.len(), 1);
        assert!(prompt.contains(&long));
        assert!(prompt.contains("[Context 1]:"));
    }

    #[test]
    fn test_budget_cuts_second_chunk() {
        let c1 = "a".repeat(50);
        let c2 = "b".repeat(80);
        let (prompt, sources) = build_context(
            "q",
            &[hit(1, "One", &c1, 0.9), hit(2, "Two", &c2, 0.8)],
            100,
        );
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].article_id, ArticleId::Int(1));
        assert!(!prompt.contains(&c2));
        assert!(!prompt.contains("[Context 2]"));
    }

    #[test]
    fn test_budget_counts_characters() {
        // 40 multi-byte characters fit a 50-character budget together with 10 more.
        let wide = "é".repeat(40);
        let (_, sources) = build_context(
            "q",
            &[hit(1, "A", &wide, 0.9), hit(2, "B", "0123456789", 0.8)],
            50,
        );
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_citations_and_prompt_shape() {
        let (prompt, sources) = ContextBuilder::new(3000)
            .with_answer_language(Some("Bahasa Indonesia".into()))
            .build(
                "What is Rust?",
                &[hit(7, "", "Rust is a language.", 0.5), hit(8, "Cargo", "Cargo builds.", 0.4)],
            );
        assert_eq!(sources[0].index, 1);
        assert_eq!(sources[0].title, "Unknown");
        assert_eq!(sources[1].title, "Cargo");
        assert!(prompt.contains("[Context 1]:\nRust is a language.\n\n[Context 2]:\nCargo builds."));
        assert!(prompt.contains("User Question: What is Rust?"));
        assert!(prompt.ends_with("Answer in Bahasa Indonesia."));
    }

    #[test]
    fn test_empty_results_give_no_citations() {
        let (prompt, sources) = build_context("q", &[], 100);
        assert!(sources.is_empty());
        assert!(prompt.contains("User Question: q"));
    }

    #[test]
    fn test_format_sources() {
        let (_, sources) = build_context("q", &[hit(3, "Title", "body", 0.87654)], 100);
        assert_eq!(
            format_sources(&sources),
            "[1] Title (article 3, chunk 0, score 0.877)"
        );
    }
}
