//! Answer generation for ragline.
//!
//! Generation service clients (Ollama and OpenAI-compatible), a cancellable
//! text stream, and the [`RagOrchestrator`] that turns a question into a
//! grounded answer with source citations.

/// Generation backends.
pub mod backends;
/// `[model]` configuration.
pub mod config;
/// Provider dispatch.
pub mod llm;
/// Context assembly and the retrieve-then-generate flow.
pub mod rag;
/// Streaming events and the fragment stream.
pub mod stream;

pub use backends::{GenerationBackend, GenerationRequest};
pub use config::{LlmProvider, ModelConfig};
pub use llm::LlmClient;
pub use rag::{
    build_context, format_sources, ContextBuilder, RagAnswer, RagOrchestrator, RagSettings,
    RagStream, SourceCitation, DEFAULT_SYSTEM_PROMPT,
};
pub use stream::{StreamEvent, TextStream};
