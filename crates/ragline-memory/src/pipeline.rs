use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ragline_core::{
    Chunk, Distance, Document, EmbeddingConfig, IdGenerator, IndexedPoint, IndexingConfig,
    RagError, RagResult, Stage,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker::{ChunkTextStyle, Chunker};
use crate::embedding::{probe_dimension, EmbeddingProvider};
use crate::formatter::detect_model_format;
use crate::gateway::CollectionGateway;
use crate::models::lookup;

/// Upper bound for the backoff between embedding retries.
const MAX_RETRY_BACKOFF_MS: u64 = 30_000;

/// Everything one indexing run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    /// Chunking, batching and collection settings.
    pub indexing: IndexingConfig,
    /// Embedding model name.
    pub model: String,
    /// Embedding requests in flight per batch.
    pub concurrency: usize,
    /// Distance metric for a newly created collection.
    pub distance: Distance,
    /// Validate and chunk only.
    pub dry_run: bool,
}

impl IndexingOptions {
    pub fn new(indexing: IndexingConfig, model: impl Into<String>) -> Self {
        Self {
            indexing,
            model: model.into(),
            concurrency: 4,
            distance: Distance::default(),
            dry_run: false,
        }
    }

    /// Options from the `[indexing]` and `[embedding]` sections.
    pub fn from_config(indexing: &IndexingConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            concurrency: embedding.concurrency,
            ..Self::new(indexing.clone(), embedding.model.clone())
        }
    }

    /// Sets the collection distance. Chainable.
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    /// Enables or disables dry-run mode. Chainable.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validate(&self) -> RagResult<()> {
        self.indexing.validate()?;
        if self.model.trim().is_empty() {
            return Err(RagError::Config("embedding model is empty".into()));
        }
        if self.concurrency == 0 {
            return Err(RagError::Config(
                "embedding concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn chunker(&self) -> RagResult<Chunker> {
        let chunker = Chunker::new(
            self.indexing.chunk_size,
            self.indexing.chunk_overlap,
            self.indexing.max_chunks_per_article,
        )?;
        let style = if self.indexing.model_aware_format {
            ChunkTextStyle::Model(detect_model_format(&self.model))
        } else {
            ChunkTextStyle::MarkdownTitle
        };
        Ok(chunker.with_style(style))
    }
}

/// Counts from one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Documents that produced chunks.
    pub articles_processed: usize,
    /// Documents without a usable id or content.
    pub articles_skipped: usize,
    /// Chunks produced by the chunk phase.
    pub chunks_created: usize,
    /// Points confirmed by a successful upsert.
    pub chunks_indexed: usize,
    /// Embedding batches skipped after a failure.
    pub batches_failed: usize,
    /// Points lost to failed upserts.
    pub points_failed: usize,
    /// Collection vector size; `None` on a dry run.
    pub vector_size: Option<usize>,
}

/// Turns documents into indexed points: chunk, embed, upsert.
///
/// The two phases run strictly in sequence. A failed embedding batch is
/// logged and skipped, the rest of the corpus still gets indexed.
pub struct IndexingPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    gateway: Arc<CollectionGateway>,
    ids: Arc<dyn IdGenerator>,
}

impl IndexingPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        gateway: Arc<CollectionGateway>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            embedder,
            gateway,
            ids,
        }
    }

    /// Indexes `documents` into `collection`.
    ///
    /// Fails only for invalid options or when the collection cannot be
    /// prepared. Per-document and per-batch problems are counted in the
    /// report instead.
    pub async fn index(
        &self,
        collection: &str,
        documents: &[Document],
        options: &IndexingOptions,
    ) -> RagResult<IndexReport> {
        options.validate()?;
        let chunker = options.chunker()?;
        let mut report = IndexReport::default();

        let vector_size = if options.dry_run {
            None
        } else {
            let size = probe_dimension(self.embedder.as_ref(), &options.model)
                .await
                .map_err(|e| e.in_stage(Stage::Indexing))?;
            if let Some(known) = lookup(&options.model).filter(|m| m.vector_size != size) {
                warn!(
                    model = %options.model,
                    expected = known.vector_size,
                    probed = size,
                    "Probed dimension differs from the known model table, using the probed size"
                );
            }
            self.gateway
                .create_collection(collection, size, options.distance, options.indexing.recreate)
                .await
                .map_err(|e| e.in_stage(Stage::Indexing))?;
            Some(size)
        };
        report.vector_size = vector_size;

        let chunks = self.chunk_phase(&chunker, documents, &mut report);
        info!(
            collection,
            articles = report.articles_processed,
            skipped = report.articles_skipped,
            chunks = report.chunks_created,
            "Chunking complete"
        );

        let Some(vector_size) = vector_size else {
            info!(collection, "Dry run, nothing embedded");
            return Ok(report);
        };

        self.embed_phase(collection, chunks, vector_size, options, &mut report)
            .await;

        info!(
            collection,
            indexed = report.chunks_indexed,
            batches_failed = report.batches_failed,
            points_failed = report.points_failed,
            "Indexing complete"
        );
        Ok(report)
    }

    fn chunk_phase(
        &self,
        chunker: &Chunker,
        documents: &[Document],
        report: &mut IndexReport,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for (position, doc) in documents.iter().enumerate() {
            match chunker.chunk_document(doc, self.ids.as_ref()) {
                Some(doc_chunks) => {
                    report.articles_processed += 1;
                    chunks.extend(doc_chunks);
                }
                None => {
                    report.articles_skipped += 1;
                    debug!(
                        position,
                        article_id = ?doc.id,
                        "Skipping document without id or content"
                    );
                }
            }
        }
        report.chunks_created = chunks.len();
        chunks
    }

    async fn embed_phase(
        &self,
        collection: &str,
        chunks: Vec<Chunk>,
        vector_size: usize,
        options: &IndexingOptions,
        report: &mut IndexReport,
    ) {
        let batch_size = options.indexing.embedding_batch_size;
        let total_batches = chunks.len().div_ceil(batch_size);
        let mut buffer: Vec<IndexedPoint> = Vec::new();
        let mut remaining = chunks.into_iter().peekable();
        let mut batch = 0usize;

        while remaining.peek().is_some() {
            batch += 1;
            let group: Vec<Chunk> = remaining.by_ref().take(batch_size).collect();
            let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();

            let vectors = match self.embed_with_retry(batch, &texts, options).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    report.batches_failed += 1;
                    warn!(
                        collection,
                        batch,
                        first_chunk_id = group.first().map(|c| c.chunk_id),
                        error = %e,
                        "Embedding batch failed, skipping"
                    );
                    continue;
                }
            };

            if vectors.len() != group.len() {
                report.batches_failed += 1;
                let err = RagError::Embedding(format!(
                    "batch {batch}: provider returned {} vectors for {} texts",
                    vectors.len(),
                    group.len()
                ));
                warn!(
                    collection,
                    batch,
                    first_chunk_id = group.first().map(|c| c.chunk_id),
                    error = %err,
                    "Embedding batch rejected"
                );
                continue;
            }

            if let Some(bad) = vectors.iter().position(|v| v.len() != vector_size) {
                report.batches_failed += 1;
                let err = RagError::DimensionMismatch {
                    expected: vector_size,
                    actual: vectors[bad].len(),
                };
                warn!(
                    collection,
                    batch,
                    chunk_id = group[bad].chunk_id,
                    article_id = %group[bad].article_id,
                    error = %err,
                    "Embedding batch rejected"
                );
                continue;
            }

            buffer.extend(
                group
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| chunk.into_point(vector)),
            );
            debug!(collection, batch, total_batches, buffered = buffer.len(), "Embedded batch");

            if buffer.len() >= options.indexing.upsert_batch_size {
                self.flush(collection, &mut buffer, report).await;
            }
        }

        self.flush(collection, &mut buffer, report).await;
    }

    /// Embeds one batch, retrying transient provider failures with
    /// exponential backoff.
    async fn embed_with_retry(
        &self,
        batch: usize,
        texts: &[String],
        options: &IndexingOptions,
    ) -> RagResult<Vec<Vec<f32>>> {
        let retries = options.indexing.embedding_retries;
        let mut attempt = 0u32;
        loop {
            match self
                .embedder
                .embed_batch(texts, &options.model, options.concurrency)
                .await
            {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < retries => {
                    let delay = retry_backoff_ms(options.indexing.retry_backoff_ms, attempt);
                    attempt += 1;
                    warn!(
                        batch,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Transient embedding failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn flush(&self, collection: &str, buffer: &mut Vec<IndexedPoint>, report: &mut IndexReport) {
        if buffer.is_empty() {
            return;
        }
        let points = std::mem::take(buffer);
        let count = points.len();
        match self.gateway.upsert(collection, points).await {
            Ok(written) => {
                report.chunks_indexed += written;
                info!(collection, written, total = report.chunks_indexed, "Upserted points");
            }
            Err(e) => {
                report.points_failed += count;
                warn!(collection, count, error = %e, "Upsert failed, points dropped");
            }
        }
    }
}

fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_RETRY_BACKOFF_MS)
}

/// Reads a JSON array of documents from `path`.
///
/// Objects may carry their id as `id` or `article_id`, as a string or an
/// integer.
pub async fn load_documents(path: impl AsRef<Path>) -> RagResult<Vec<Document>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await?;
    let documents: Vec<Document> = serde_json::from_str(&raw)?;
    debug!(path = %path.display(), count = documents.len(), "Loaded documents");
    Ok(documents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedding;
    use crate::store::{InMemoryVectorStore, VectorStore};
    use async_trait::async_trait;
    use ragline_core::{ArticleId, SnowflakeGenerator};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn options() -> IndexingOptions {
        let config = IndexingConfig {
            retry_backoff_ms: 0,
            ..IndexingConfig::default()
        };
        IndexingOptions::new(config, "local")
    }

    fn pipeline_with(
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (IndexingPipeline, Arc<InMemoryVectorStore>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let gateway = Arc::new(CollectionGateway::new(store.clone()));
        let ids = Arc::new(SnowflakeGenerator::default());
        (IndexingPipeline::new(embedder, gateway, ids), store)
    }

    /// Fails for any text containing "poison"; returns 3 dims for "short".
    struct Picky {
        inner: LocalEmbedding,
    }

    #[async_trait]
    impl EmbeddingProvider for Picky {
        async fn embed(&self, text: &str, model: &str) -> RagResult<Vec<f32>> {
            if text.contains("poison") {
                return Err(RagError::Embedding("provider returned 500".into()));
            }
            let mut v = self.inner.embed(text, model).await?;
            if text.contains("short") {
                v.truncate(3);
            }
            Ok(v)
        }
    }

    #[tokio::test]
    async fn test_indexes_all_chunks() {
        let (pipeline, store) = pipeline_with(Arc::new(LocalEmbedding::new(32)));
        let docs = vec![
            Document::new(1, "A", words("a", 300)),
            Document::new("b", "B", words("b", 50)),
        ];
        let report = pipeline.index("docs", &docs, &options()).await.unwrap();
        assert_eq!(report.articles_processed, 2);
        assert_eq!(report.chunks_created, 4);
        assert_eq!(report.chunks_indexed, 4);
        assert_eq!(report.vector_size, Some(32));
        assert_eq!(store.collection_info("docs").await.unwrap().points_count, 4);
    }

    #[tokio::test]
    async fn test_skips_documents_without_id_or_content() {
        let (pipeline, _) = pipeline_with(Arc::new(LocalEmbedding::new(8)));
        let docs = vec![
            Document::new(1, "ok", "some words"),
            Document::new("", "blank id", "text"),
            Document::new(3, "empty", "   "),
            Document {
                title: "no id".into(),
                content: "text".into(),
                ..Document::default()
            },
        ];
        let report = pipeline.index("docs", &docs, &options()).await.unwrap();
        assert_eq!(report.articles_processed, 1);
        assert_eq!(report.articles_skipped, 3);
        assert_eq!(report.chunks_indexed, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let (pipeline, _) = pipeline_with(Arc::new(Picky {
            inner: LocalEmbedding::new(8),
        }));
        let docs = vec![
            Document::new(1, "one", "fine text"),
            Document::new(2, "two", "poison text"),
            Document::new(3, "three", "more fine text"),
        ];
        let mut opts = options();
        opts.indexing.embedding_batch_size = 1;
        opts.indexing.upsert_batch_size = 2;
        let report = pipeline.index("docs", &docs, &opts).await.unwrap();
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.chunks_created, 3);
        assert_eq!(report.chunks_indexed, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let (pipeline, store) = pipeline_with(Arc::new(Picky {
            inner: LocalEmbedding::new(8),
        }));
        let docs = vec![
            Document::new(1, "one", "fine text"),
            Document::new(2, "two", "short text"),
            Document::new(3, "three", "also fine"),
        ];
        let mut opts = options();
        opts.indexing.embedding_batch_size = 2;
        let report = pipeline.index("docs", &docs, &opts).await.unwrap();
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(store.collection_info("docs").await.unwrap().points_count, 1);
    }

    /// Returns `delta` more (or fewer) vectors than it was given texts.
    struct MiscountingEmbedding {
        inner: LocalEmbedding,
        delta: isize,
    }

    #[async_trait]
    impl EmbeddingProvider for MiscountingEmbedding {
        async fn embed(&self, text: &str, model: &str) -> RagResult<Vec<f32>> {
            self.inner.embed(text, model).await
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            model: &str,
            _concurrency: usize,
        ) -> RagResult<Vec<Vec<f32>>> {
            let mut vectors = Vec::new();
            for text in texts {
                vectors.push(self.inner.embed(text, model).await?);
            }
            if self.delta < 0 {
                vectors.truncate(texts.len().saturating_sub(self.delta.unsigned_abs()));
            } else if let Some(last) = vectors.last().cloned() {
                vectors.extend(std::iter::repeat(last).take(self.delta as usize));
            }
            Ok(vectors)
        }
    }

    #[tokio::test]
    async fn test_short_vector_list_rejects_batch() {
        let (pipeline, store) = pipeline_with(Arc::new(MiscountingEmbedding {
            inner: LocalEmbedding::new(8),
            delta: -1,
        }));
        let docs = vec![
            Document::new(1, "one", "fine text"),
            Document::new(2, "two", "more text"),
        ];
        let report = pipeline.index("docs", &docs, &options()).await.unwrap();
        assert_eq!(report.chunks_created, 2);
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.chunks_indexed, 0);
        assert_eq!(store.collection_info("docs").await.unwrap().points_count, 0);
    }

    #[tokio::test]
    async fn test_extra_vectors_reject_batch() {
        let (pipeline, _) = pipeline_with(Arc::new(MiscountingEmbedding {
            inner: LocalEmbedding::new(8),
            delta: 2,
        }));
        let docs = vec![Document::new(1, "one", "fine text")];
        let report = pipeline.index("docs", &docs, &options()).await.unwrap();
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.chunks_indexed, 0);
    }

    /// Fails batch calls with `error` until `failures` calls have been made.
    struct Flaky {
        inner: LocalEmbedding,
        error: &'static str,
        failures: usize,
        batch_calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        async fn embed(&self, text: &str, model: &str) -> RagResult<Vec<f32>> {
            self.inner.embed(text, model).await
        }

        async fn embed_batch(
            &self,
            texts: &[String],
            model: &str,
            concurrency: usize,
        ) -> RagResult<Vec<Vec<f32>>> {
            if self.batch_calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(RagError::Embedding(self.error.into()));
            }
            self.inner.embed_batch(texts, model, concurrency).await
        }
    }

    fn flaky(error: &'static str, failures: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: LocalEmbedding::new(8),
            error,
            failures,
            batch_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_transient_batch_failure_is_retried() {
        let provider = flaky("provider returned 503 Service Unavailable", 2);
        let (pipeline, _) = pipeline_with(provider.clone());
        let report = pipeline
            .index("docs", &[Document::new(1, "one", "fine text")], &options())
            .await
            .unwrap();
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.batches_failed, 0);
        assert_eq!(report.chunks_indexed, 1);
    }

    #[tokio::test]
    async fn test_permanent_batch_failure_is_not_retried() {
        let provider = flaky("model 'x' not found", 1);
        let (pipeline, _) = pipeline_with(provider.clone());
        let report = pipeline
            .index("docs", &[Document::new(1, "one", "fine text")], &options())
            .await
            .unwrap();
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.chunks_indexed, 0);
    }

    #[tokio::test]
    async fn test_probed_size_wins_over_known_model_table() {
        let (pipeline, _) = pipeline_with(Arc::new(LocalEmbedding::new(8)));
        let opts = IndexingOptions::new(
            IndexingConfig {
                retry_backoff_ms: 0,
                ..IndexingConfig::default()
            },
            "bge-m3:567m",
        );
        let report = pipeline
            .index("docs", &[Document::new(1, "one", "fine text")], &opts)
            .await
            .unwrap();
        assert_eq!(lookup("bge-m3:567m").map(|m| m.vector_size), Some(1024));
        assert_eq!(report.vector_size, Some(8));
        assert_eq!(report.chunks_indexed, 1);
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        assert_eq!(retry_backoff_ms(500, 0), 500);
        assert_eq!(retry_backoff_ms(500, 2), 2_000);
        assert_eq!(retry_backoff_ms(500, 20), MAX_RETRY_BACKOFF_MS);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let (pipeline, store) = pipeline_with(Arc::new(LocalEmbedding::new(8)));
        let docs = vec![Document::new(1, "A", words("a", 200))];
        let report = pipeline
            .index("docs", &docs, &options().with_dry_run(true))
            .await
            .unwrap();
        assert_eq!(report.chunks_created, 2);
        assert_eq!(report.chunks_indexed, 0);
        assert_eq!(report.vector_size, None);
        assert!(store.collection_info("docs").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_io() {
        let (pipeline, store) = pipeline_with(Arc::new(LocalEmbedding::new(8)));
        let mut opts = options();
        opts.indexing.chunk_overlap = opts.indexing.chunk_size;
        let err = pipeline
            .index("docs", &[Document::new(1, "A", "x")], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        assert!(store.collection_info("docs").await.is_err());
    }

    #[tokio::test]
    async fn test_model_aware_chunk_text() {
        let (pipeline, store) = pipeline_with(Arc::new(LocalEmbedding::new(8)));
        let mut opts = IndexingOptions::new(IndexingConfig::default(), "embeddinggemma:latest");
        opts.indexing.model_aware_format = true;
        pipeline
            .index("docs", &[Document::new(1, "Title", "body words")], &opts)
            .await
            .unwrap();
        let points = store.scroll("docs", None, 10).await.unwrap();
        assert_eq!(points[0].payload.text, "title: Title | text: body words");
        assert_eq!(points[0].payload.article_id, ArticleId::Int(1));
    }

    #[tokio::test]
    async fn test_load_documents_accepts_both_id_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "title": "A", "content": "x"}},
               {{"article_id": "b", "title": "B", "content": "y", "source": "wiki"}}]"#
        )
        .unwrap();
        let docs = load_documents(file.path()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, Some(ArticleId::Int(1)));
        assert_eq!(docs[1].id, Some(ArticleId::Text("b".into())));
        assert_eq!(docs[1].source.as_deref(), Some("wiki"));
    }

    #[tokio::test]
    async fn test_load_documents_missing_file() {
        let err = load_documents("/nonexistent/ragline/docs.json").await.unwrap_err();
        assert!(matches!(err, RagError::Io(_)));
    }
}
