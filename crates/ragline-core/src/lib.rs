//! Core types and error definitions for the ragline RAG pipeline.
//!
//! This crate provides the foundational types shared across all ragline crates:
//! the document/chunk/point data model, error handling, id generation, and the
//! configuration sections read by the command-line tool.
//!
//! # Main types
//!
//! - [`RagError`]: Unified error enum for every pipeline stage.
//! - [`RagResult`]: Convenience alias for `Result<T, RagError>`.
//! - [`Document`]: A source record to be chunked and indexed.
//! - [`Chunk`]: A word-window slice of a document.
//! - [`IndexedPoint`]: The `(id, vector, payload)` unit stored in the vector database.
//! - [`SearchResult`]: One ranked hit returned by a search.
//! - [`IdGenerator`] / [`SnowflakeGenerator`]: Unique, time-ordered point ids.

/// Configuration sections with serde defaults and validation.
pub mod config;
/// Error taxonomy and pipeline stages.
pub mod error;
/// Unique id generation.
pub mod id;
/// Documents, chunks, points and search results.
pub mod types;

pub use config::{EmbeddingConfig, IndexingConfig, SearchConfig, StoreConfig};
pub use error::{RagError, RagResult, Stage};
pub use id::{IdGenerator, SnowflakeGenerator, SnowflakeParts};
pub use types::{
    ArticleId, Chunk, ChunkPayload, CollectionStats, Distance, Document, FusionMethod,
    IndexedPoint, SearchResult, StoredPoint,
};
