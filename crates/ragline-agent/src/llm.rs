use crate::backends::ollama::OllamaBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::{GenerationBackend, GenerationRequest};
use crate::config::{LlmProvider, ModelConfig};
use crate::stream::TextStream;
use ragline_core::{RagResult, Stage};
use tracing::debug;

/// Generation client that dispatches to the configured provider backend.
pub struct LlmClient {
    backend: Box<dyn GenerationBackend>,
    model_id: String,
}

impl LlmClient {
    pub fn new(config: ModelConfig) -> RagResult<Self> {
        config.validate()?;
        let model_id = config.model_id.clone();
        let backend: Box<dyn GenerationBackend> = match config.provider {
            LlmProvider::Ollama => Box::new(OllamaBackend::new(config)?),
            LlmProvider::OpenAi => Box::new(OpenAiBackend::new(config)?),
        };
        Ok(Self { backend, model_id })
    }

    /// Create from a pre-built backend (for custom/external providers).
    pub fn from_backend(backend: Box<dyn GenerationBackend>, model_id: impl Into<String>) -> Self {
        Self {
            backend,
            model_id: model_id.into(),
        }
    }

    /// Model that answers.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Blocking generation.
    pub async fn generate(&self, request: &GenerationRequest) -> RagResult<String> {
        debug!(model = %self.model_id, prompt_chars = request.prompt.len(), "Generating");
        self.backend
            .generate(request)
            .await
            .map_err(|e| e.in_stage(Stage::Generating))
    }

    /// Streaming generation.
    pub async fn generate_stream(&self, request: &GenerationRequest) -> RagResult<TextStream> {
        debug!(model = %self.model_id, prompt_chars = request.prompt.len(), "Generating (stream)");
        self.backend
            .generate_stream(request)
            .await
            .map_err(|e| e.in_stage(Stage::Generating))
    }
}
