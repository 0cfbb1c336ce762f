pub mod ollama;
pub mod openai;

use crate::stream::{StreamEvent, TextStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use ragline_core::{RagError, RagResult};
use std::time::Duration;
use tokio::sync::mpsc;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Full prompt, context included.
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Overrides the configured temperature.
    pub temperature: Option<f32>,
    /// Overrides the configured token limit.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Sets the system prompt. Chainable.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Trait for generation service backends.
///
/// To add a provider, implement this trait in `backends/`, add a variant to
/// [`LlmProvider`](crate::config::LlmProvider) and wire it in
/// [`LlmClient::new`](crate::llm::LlmClient::new).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Blocking generation: the whole answer at once.
    async fn generate(&self, request: &GenerationRequest) -> RagResult<String>;

    /// Streaming generation.
    async fn generate_stream(&self, request: &GenerationRequest) -> RagResult<TextStream>;
}

/// What a single line of a streamed response means.
#[derive(Debug, PartialEq)]
pub(crate) enum LineEvent {
    Text(String),
    /// A final fragment that also ends the stream.
    Last(String),
    Done,
    Error(String),
    Skip,
}

/// HTTP client shared by the generation backends.
///
/// Only connecting and each wait for more body bytes are bounded by
/// `timeout`, so a long streamed answer is not cut off mid-way. Blocking
/// calls add a whole-request timeout per request.
pub(crate) fn http_client(timeout: Duration) -> RagResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| RagError::Http(e.to_string()))
}

/// Maps a non-success response to a generation error carrying its body.
pub(crate) async fn check_status(resp: reqwest::Response, service: &str) -> RagResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(RagError::Generation(format!("{service} returned {status}: {body}")))
}

/// Reads a line-oriented streaming body on a background task.
///
/// Each complete line goes through `parse`. The stream ends at the first
/// done marker, at the first error, or when the body ends.
pub(crate) fn spawn_line_stream<F>(resp: reqwest::Response, parse: F) -> TextStream
where
    F: Fn(&str) -> LineEvent + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<StreamEvent>(256);
    let mut byte_stream = resp.bytes_stream();

    let producer = tokio::spawn(async move {
        let mut buffer = LineBuffer::default();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: format!("Stream read error: {e}"),
                        })
                        .await;
                    return;
                }
            };
            buffer.extend(&chunk);

            while let Some(line) = buffer.next_line() {
                if !forward(&tx, parse(line.trim())).await {
                    return;
                }
            }
        }

        let rest = buffer.finish();
        let rest = rest.trim();
        if !rest.is_empty() && !forward(&tx, parse(rest)).await {
            return;
        }
        let _ = tx.send(StreamEvent::Done).await;
    });

    TextStream::new(rx, producer)
}

/// Accumulates raw body bytes and hands out complete lines.
///
/// Lines are decoded only once their terminating newline has arrived, so a
/// character split across network chunks is never mangled.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete line, without its newline.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let line_end = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=line_end).collect();
        Some(String::from_utf8_lossy(&line[..line_end]).into_owned())
    }

    /// Whatever is left after the body ended.
    pub(crate) fn finish(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Sends the event for one line. Returns `false` once the stream is over,
/// either because the line ended it or because the consumer went away.
async fn forward(tx: &mpsc::Sender<StreamEvent>, event: LineEvent) -> bool {
    let (event, keep_going) = match event {
        LineEvent::Skip => return true,
        LineEvent::Text(text) if text.is_empty() => return true,
        LineEvent::Text(text) => (StreamEvent::TextDelta { text }, true),
        LineEvent::Last(text) => {
            if !text.is_empty() && tx.send(StreamEvent::TextDelta { text }).await.is_err() {
                return false;
            }
            (StreamEvent::Done, false)
        }
        LineEvent::Done => (StreamEvent::Done, false),
        LineEvent::Error(message) => (StreamEvent::Error { message }, false),
    };
    tx.send(event).await.is_ok() && keep_going
}
