use super::{check_status, http_client, spawn_line_stream, GenerationBackend, GenerationRequest, LineEvent};
use crate::config::ModelConfig;
use crate::stream::TextStream;
use async_trait::async_trait;
use ragline_core::{RagError, RagResult};
use std::time::Duration;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI and any server implementing the chat completions API
/// (vLLM, llama.cpp server, LM Studio, Ollama's `/v1` endpoint).
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: ModelConfig) -> RagResult<Self> {
        let http = http_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = &request.system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }
        api_messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt
        }));

        api_messages
    }

    fn build_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model_id,
            "messages": self.build_messages(request),
            "temperature": request.temperature.unwrap_or(self.config.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "stream": stream,
        })
    }

    async fn post(&self, body: &serde_json::Value, stream: bool) -> RagResult<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let mut request = self.http.post(&url).header("Content-Type", "application/json");
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        if !stream {
            request = request.timeout(Duration::from_secs(self.config.timeout_secs));
        }

        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        check_status(resp, "OpenAI API").await
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> RagResult<String> {
        let resp = self.post(&self.build_body(request, false), false).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        parse_openai_response(&body)
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> RagResult<TextStream> {
        let resp = self.post(&self.build_body(request, true), true).await?;
        Ok(spawn_line_stream(resp, parse_sse_line))
    }
}

/// Text of the first choice of a non-streaming completion.
pub fn parse_openai_response(body: &serde_json::Value) -> RagResult<String> {
    if let Some(message) = body["error"]["message"].as_str() {
        return Err(RagError::Generation(format!("OpenAI API error: {message}")));
    }
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RagError::Generation(format!("Unexpected completion response: {body}")))
}

/// Interprets one server-sent-events line.
fn parse_sse_line(line: &str) -> LineEvent {
    if line.is_empty() || line.starts_with(':') {
        return LineEvent::Skip;
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return LineEvent::Skip;
    };
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
        return LineEvent::Skip;
    };
    if let Some(message) = event["error"]["message"].as_str() {
        return LineEvent::Error(format!("OpenAI API error: {message}"));
    }
    let choice = &event["choices"][0];
    let text = choice["delta"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if choice["finish_reason"].is_string() {
        LineEvent::Last(text)
    } else {
        LineEvent::Text(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OpenAiBackend {
        OpenAiBackend::new(ModelConfig {
            provider: LlmProvider::OpenAi,
            model_id: "gpt-4o-mini".into(),
            api_key: Some("sk-test".into()),
            api_base_url: Some(server.uri()),
            ..ModelConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_openai_response() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}]
        });
        assert_eq!(parse_openai_response(&body).unwrap(), "Hi");

        let err = parse_openai_response(&serde_json::json!({"error": {"message": "bad key"}}));
        assert!(matches!(err, Err(RagError::Generation(ref m)) if m.contains("bad key")));
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line(": keep-alive"), LineEvent::Skip);
        assert_eq!(parse_sse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#),
            LineEvent::Text("Hi".into())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            LineEvent::Last(String::new())
        );
    }

    #[tokio::test]
    async fn test_generate_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "question"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "answer"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new("question").with_system_prompt("sys");
        assert_eq!(backend(&server).generate(&request).await.unwrap(), "answer");
    }

    #[tokio::test]
    async fn test_stream_sse_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            ": comment\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Jak\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"arta\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"},\"finish_reason\":null}]}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = backend(&server)
            .generate_stream(&GenerationRequest::new("q"))
            .await
            .unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), "Jakarta");
    }

    #[tokio::test]
    async fn test_error_status_is_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_stream(&GenerationRequest::new("q"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::Generation(ref m) if m.contains("401")));
    }
}
