//! Indexing and retrieval for ragline.
//!
//! Turns documents into overlapping word-window chunks, embeds them with
//! model-aware formatting, stores them in a vector database and searches
//! them with hybrid (vector + keyword) fused queries.
//!
//! # Main types
//!
//! - [`Chunker`]: Word-window chunking with a per-document cap.
//! - [`EmbeddingFormatter`]: Per-model-family document and query templates.
//! - [`EmbeddingProvider`]: Trait for embedding services; [`OllamaEmbedding`]
//!   talks to Ollama, [`LocalEmbedding`] hashes words locally.
//! - [`VectorStore`]: Trait for vector databases; [`QdrantStore`] speaks the
//!   Qdrant REST API, [`InMemoryVectorStore`] runs in-process.
//! - [`CollectionGateway`]: Collection lifecycle and guarded upserts.
//! - [`IndexingPipeline`]: Chunk, embed and upsert a corpus.
//! - [`HybridSearcher`]: Fused multi-branch search with vector fallback.

/// Word-window chunking.
pub mod chunker;
/// Embedding provider trait, Ollama client and local hashing embedder.
pub mod embedding;
/// Model-family-aware text formatting.
pub mod formatter;
/// Rank and score fusion of prefetch branches.
pub mod fusion;
/// Collection lifecycle and point writes.
pub mod gateway;
/// Hybrid search, article lookup and grouping.
pub mod hybrid;
/// Known embedding models.
pub mod models;
/// Two-phase indexing pipeline.
pub mod pipeline;
/// Qdrant REST client.
pub mod qdrant;
/// Vector store trait, filters and in-memory implementation.
pub mod store;

pub use chunker::{chunk_text, ChunkTextStyle, Chunker};
pub use embedding::{
    probe_dimension, EmbeddingProvider, LocalEmbedding, OllamaEmbedding, ProviderModel,
};
pub use formatter::{
    detect_model_format, format_document, format_query, supported_models, EmbeddingFormatter,
    ModelFormat,
};
pub use fusion::fuse;
pub use gateway::CollectionGateway;
pub use hybrid::{
    group_by_article, rank_groups, FallbackReason, HybridOutcome, HybridSearcher, SearchRequest,
};
pub use models::{known_models, vector_size_or_probe, KnownModel};
pub use pipeline::{load_documents, IndexReport, IndexingOptions, IndexingPipeline};
pub use qdrant::QdrantStore;
pub use store::{
    CollectionInfo, FieldCondition, Filter, InMemoryVectorStore, Match, PayloadIndex, Prefetch,
    VectorStore,
};
