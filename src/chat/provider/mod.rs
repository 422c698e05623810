//! Completion provider abstraction
//!
//! A provider turns a prepared message list into a [`DeltaStream`]: a lazy,
//! finite, non-restartable sequence of [`DeltaChunk`]s tied to a
//! cancellation token. Cancelling the token (or dropping the stream) tells
//! the producer to stop and release the upstream connection.

mod openai;

pub use openai::{AuthStyle, OpenAiProvider};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{DeltaChunk, FinishReason, Message};
use crate::error::Result;

/// Unified provider trait for completion backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start a streaming completion.
    ///
    /// Resolves once the provider has accepted the request; chunks then
    /// arrive through the returned stream. `cancel` aborts both the pending
    /// request and any later streaming.
    async fn create_stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;

    /// Get the provider name for logging
    fn name(&self) -> &'static str;
}

/// A fully assembled completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Cancellable lazy sequence of delta chunks
#[derive(Debug)]
pub struct DeltaStream {
    rx: mpsc::Receiver<DeltaChunk>,
    cancel: CancellationToken,
}

impl DeltaStream {
    /// Create a stream and the sender its producer writes into
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (mpsc::Sender<DeltaChunk>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx, cancel })
    }

    /// A stream over a fixed list of chunks
    pub fn from_chunks(chunks: Vec<DeltaChunk>, cancel: CancellationToken) -> Self {
        let (tx, stream) = Self::channel(chunks.len(), cancel);
        for chunk in chunks {
            // Capacity equals the chunk count, so this cannot fill up
            let _ = tx.try_send(chunk);
        }
        stream
    }

    /// Stop the producer and release the upstream request
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain the stream into the full text and the last finish reason seen
    pub async fn collect_text(mut self) -> (String, Option<FinishReason>) {
        let mut text = String::new();
        let mut finish = None;
        while let Some(chunk) = self.next().await {
            if let Some(content) = chunk.content {
                text.push_str(&content);
            }
            if chunk.finish_reason.is_some() {
                finish = chunk.finish_reason;
            }
        }
        (text, finish)
    }
}

impl Stream for DeltaStream {
    type Item = DeltaChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
