use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use ragline_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events emitted during a streaming generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text.
    TextDelta {
        text: String,
    },

    /// The service signalled the end of the answer.
    Done,

    /// The stream broke off.
    Error {
        message: String,
    },
}

/// Forward-only stream of generated text fragments.
///
/// Ends after the service's done signal. Dropping the stream stops the
/// producer task, so a consumer can disconnect at any point without error.
pub struct TextStream {
    rx: mpsc::Receiver<StreamEvent>,
    producer: JoinHandle<()>,
    finished: bool,
}

impl TextStream {
    pub fn new(rx: mpsc::Receiver<StreamEvent>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer,
            finished: false,
        }
    }

    /// Stops generation early.
    pub fn cancel(self) {
        drop(self);
    }

    /// Drains the stream into one string.
    pub async fn collect_text(mut self) -> RagResult<String> {
        use futures_util::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TextStream {
    type Item = RagResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match ready!(this.rx.poll_recv(cx)) {
            Some(StreamEvent::TextDelta { text }) => Poll::Ready(Some(Ok(text))),
            Some(StreamEvent::Error { message }) => {
                this.finished = true;
                Poll::Ready(Some(Err(RagError::Generation(message))))
            }
            Some(StreamEvent::Done) | None => {
                this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}
