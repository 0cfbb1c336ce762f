use std::fmt;

use thiserror::Error;

/// A convenience `Result` alias using [`RagError`].
pub type RagResult<T> = Result<T, RagError>;

/// Top-level error type for the ragline pipeline.
///
/// Each variant belongs to exactly one pipeline [`Stage`], so an error that
/// reaches the top of a command can always say where it happened.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid configuration, detected before any I/O happens.
    #[error("Config error: {0}")]
    Config(String),

    /// Text could not be split into chunks.
    #[error("Chunking error: {0}")]
    Chunking(String),

    /// The embedding provider failed or returned an unusable response.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector does not have the collection's fixed dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Vector size the collection was created with.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// The vector store rejected or failed a request.
    #[error("Store error: {0}")]
    Store(String),

    /// The vector store does not support a requested query primitive.
    #[error("Unsupported by store: {0}")]
    Unsupported(String),

    /// A search request could not be served.
    #[error("Search error: {0}")]
    Search(String),

    /// The generation service failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// An outbound HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Configuration loading and validation.
    Configuration,
    /// Splitting documents into chunks.
    Chunking,
    /// Turning text into vectors.
    Embedding,
    /// Collection management and upserts.
    Indexing,
    /// Retrieval against the vector store.
    Searching,
    /// Answer generation.
    Generating,
}

impl Stage {
    /// Lower-case stage name used in logs and user-facing messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Searching => "searching",
            Stage::Generating => "generating",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RagError {
    /// The pipeline stage this error belongs to.
    ///
    /// Transport-level errors (`Http`, `Json`, `Io`) carry no stage of their
    /// own; they are attributed to indexing, which is where the store and file
    /// I/O happen. Callers that know better should wrap them with
    /// [`RagError::in_stage`].
    pub fn stage(&self) -> Stage {
        match self {
            RagError::Config(_) => Stage::Configuration,
            RagError::Chunking(_) => Stage::Chunking,
            RagError::Embedding(_) => Stage::Embedding,
            RagError::DimensionMismatch { .. }
            | RagError::Store(_)
            | RagError::Http(_)
            | RagError::Json(_)
            | RagError::Io(_) => Stage::Indexing,
            RagError::Unsupported(_) | RagError::Search(_) => Stage::Searching,
            RagError::Generation(_) => Stage::Generating,
        }
    }

    /// Re-attribute a stage-less error to `stage`, keeping its message.
    ///
    /// Errors that already carry a specific stage are returned unchanged.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            RagError::Http(_) | RagError::Json(_) | RagError::Io(_) => {
                let msg = self.to_string();
                match stage {
                    Stage::Configuration => RagError::Config(msg),
                    Stage::Chunking => RagError::Chunking(msg),
                    Stage::Embedding => RagError::Embedding(msg),
                    Stage::Indexing => RagError::Store(msg),
                    Stage::Searching => RagError::Search(msg),
                    Stage::Generating => RagError::Generation(msg),
                }
            }
            other => other,
        }
    }

    /// Whether the error is a transient provider failure (timeouts, 5xx,
    /// connection problems) as opposed to bad input or configuration.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Http(_) => true,
            RagError::Embedding(msg)
            | RagError::Store(msg)
            | RagError::Search(msg)
            | RagError::Generation(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connect")
                    || lower.contains("error sending request")
                    || lower.contains("500")
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("504")
            }
            _ => false,
        }
    }
}
