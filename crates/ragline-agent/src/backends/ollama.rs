use super::{check_status, http_client, spawn_line_stream, GenerationBackend, GenerationRequest, LineEvent};
use crate::config::ModelConfig;
use crate::stream::TextStream;
use async_trait::async_trait;
use ragline_core::{RagError, RagResult};
use std::time::Duration;

/// Ollama `/api/generate` backend.
///
/// Streaming responses are newline-delimited JSON objects carrying a
/// `response` fragment and a `done` flag.
pub struct OllamaBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: ModelConfig) -> RagResult<Self> {
        let http = http_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn build_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "prompt": request.prompt,
            "stream": stream,
            "options": {
                "temperature": request.temperature.unwrap_or(self.config.temperature),
                "num_predict": request.max_tokens.unwrap_or(self.config.max_tokens),
            },
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value, stream: bool) -> RagResult<reqwest::Response> {
        let url = format!("{}/api/generate", self.config.base_url());
        let mut request = self.http.post(&url).json(body);
        if !stream {
            request = request.timeout(Duration::from_secs(self.config.timeout_secs));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        check_status(resp, "Ollama").await
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(&self, request: &GenerationRequest) -> RagResult<String> {
        let resp = self.post(&self.build_body(request, false), false).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        if let Some(error) = body["error"].as_str() {
            return Err(RagError::Generation(format!("Ollama error: {error}")));
        }
        Ok(body["response"].as_str().unwrap_or_default().to_string())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> RagResult<TextStream> {
        let resp = self.post(&self.build_body(request, true), true).await?;
        Ok(spawn_line_stream(resp, parse_ndjson_line))
    }
}

/// Interprets one NDJSON line. Lines that are not JSON are skipped.
fn parse_ndjson_line(line: &str) -> LineEvent {
    if line.is_empty() {
        return LineEvent::Skip;
    }
    let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
        return LineEvent::Skip;
    };
    if let Some(error) = data["error"].as_str() {
        return LineEvent::Error(format!("Ollama error: {error}"));
    }
    let text = data["response"].as_str().unwrap_or_default();
    if data["done"].as_bool().unwrap_or(false) {
        // The closing object may still carry a last fragment.
        return if text.is_empty() {
            LineEvent::Done
        } else {
            LineEvent::Last(text.to_string())
        };
    }
    LineEvent::Text(text.to_string())
}
