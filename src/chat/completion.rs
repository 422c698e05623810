// src/chat/completion.rs
// Completion client: turns (command, context) into a streaming completion

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::provider::{CompletionRequest, DeltaStream, Provider};
use super::types::Message;

/// Outcome of starting a completion.
///
/// Failures carry no cause: it is logged here and nowhere else.
#[derive(Debug)]
pub enum Completion {
    Streaming(DeltaStream),
    Failed,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Streaming(_))
    }
}

/// Wraps a provider with the game's system prompt and request settings
pub struct CompletionClient {
    provider: Arc<dyn Provider>,
    system_prompt: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn Provider>, system_prompt: impl Into<String>) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_limits(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// System rules, then the prior context, then the new command
    pub fn build_messages(&self, command: &str, context: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(Message::system(self.system_prompt.as_str()));
        messages.extend_from_slice(context);
        messages.push(Message::user(command));
        messages
    }

    /// Start a streaming completion for `command`.
    ///
    /// Without a `cancel` token the request runs until the stream is
    /// dropped or exhausted.
    pub async fn complete(
        &self,
        command: &str,
        context: &[Message],
        cancel: Option<CancellationToken>,
    ) -> Completion {
        let cancel = cancel.unwrap_or_default();
        let mut request = CompletionRequest::new(self.build_messages(command, context));
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;

        match self.provider.create_stream(request, cancel.clone()).await {
            Ok(stream) => Completion::Streaming(stream),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!(provider = self.provider.name(), "completion cancelled before streaming");
                Completion::Failed
            }
            Err(e) => {
                error!(provider = self.provider.name(), "completion failed: {}", e);
                Completion::Failed
            }
        }
    }
}
