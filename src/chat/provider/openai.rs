//! OpenAI-compatible provider implementation (Chat Completions API)
//!
//! Works against api.openai.com and against Azure OpenAI deployments, which
//! differ only in how the key is sent and an `api-version` query parameter.
//! Uses core::SseDecoder for SSE stream parsing.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CompletionRequest, DeltaStream, Provider};
use crate::chat::types::{DeltaChunk, FinishReason, Message};
use crate::config::ProviderConfig;
use crate::core::{SseDecoder, SseFrame};
use crate::error::{ForestError, Result};

/// Chunks buffered between the HTTP reader task and the consumer
const STREAM_BUFFER: usize = 64;

/// How the API key is attached to requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` (OpenAI)
    #[default]
    Bearer,
    /// `api-key: <key>` header (Azure OpenAI)
    ApiKey,
}

/// Streaming provider for the Chat Completions endpoint
pub struct OpenAiProvider {
    client: HttpClient,
    endpoint: String,
    model: String,
    api_key: String,
    auth: AuthStyle,
    api_version: Option<String>,
    request_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            auth: config.auth,
            api_version: config.api_version.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    /// Read the SSE body and forward each choice delta until `[DONE]`,
    /// end of body, transport error, or cancellation.
    async fn process_sse_stream(
        response: reqwest::Response,
        tx: mpsc::Sender<DeltaChunk>,
        cancel: CancellationToken,
    ) {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("completion stream aborted by consumer");
                    return;
                }
                next = body.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!("completion stream broke off: {}", e);
                    return;
                }
                None => break,
            };

            for frame in decoder.push(&bytes) {
                if !Self::forward_frame(frame, &tx).await {
                    return;
                }
            }
        }

        // A last frame without the closing blank line still counts
        if let Some(frame) = decoder.finish() {
            debug!("completion body ended mid-frame, flushing");
            Self::forward_frame(frame, &tx).await;
        }
    }

    /// Forward one decoded frame. Returns false once the stream is over
    /// (`[DONE]`) or the consumer has gone away.
    async fn forward_frame(frame: SseFrame, tx: &mpsc::Sender<DeltaChunk>) -> bool {
        if frame.is_done() {
            return false;
        }

        let Some(chunk) = frame.try_parse::<ChatStreamChunk>() else {
            debug!("skipping unparsable frame: {}", frame.preview());
            return true;
        };

        match chunk.into_delta() {
            Some(delta) => tx.send(delta).await.is_ok(),
            None => true,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn create_stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let body = self.build_body(&request);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        builder = match self.auth {
            AuthStyle::Bearer => builder.bearer_auth(&self.api_key),
            AuthStyle::ApiKey => builder.header("api-key", &self.api_key),
        };
        if let Some(version) = &self.api_version {
            builder = builder.query(&[("api-version", version)]);
        }

        // The timeout covers the wait for response headers, not the stream itself
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ForestError::Cancelled),
            response = tokio::time::timeout(self.request_timeout, builder.send()) => {
                response.map_err(|_| ForestError::Timeout(self.request_timeout))??
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("(failed to read body: {})", e));
            return Err(ForestError::Provider { status, body: text });
        }

        let (tx, stream) = DeltaStream::channel(STREAM_BUFFER, cancel.clone());
        tokio::spawn(Self::process_sse_stream(response, tx, cancel));

        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ============================================================================
// Chat Completions API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ChatMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}

impl ChatStreamChunk {
    /// Only the first choice is used; usage-only chunks have none
    fn into_delta(self) -> Option<DeltaChunk> {
        let choice = self.choices.into_iter().next()?;
        Some(DeltaChunk {
            content: choice.delta.content,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from),
        })
    }
}
