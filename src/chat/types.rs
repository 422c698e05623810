// src/chat/types.rs
// Conversation and streaming types shared by the bus, the relay and the provider

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Speaker of a message in the game conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Full conversation history, owned by the browser and re-sent with every command
pub type Context = Vec<Message>;

/// Identifier tying a submission to the stream connection of the same browser tab
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Blank identifiers are treated as absent
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A submitted player command travelling over the command bus
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub command: String,
    pub context: Context,
    /// Target session; `None` reaches every relay
    pub session: Option<SessionId>,
}

impl CommandEvent {
    pub fn new(command: impl Into<String>, context: Context) -> Self {
        Self {
            command: command.into(),
            context,
            session: None,
        }
    }

    pub fn addressed_to(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }
}

/// Why the provider stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the turn
    Stop,
    /// Anything else the provider reports (`length`, `content_filter`, ...)
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Other(reason) => reason,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl Serialize for FinishReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FinishReason::from(raw.as_str()))
    }
}

/// One increment of a streamed completion, forwarded verbatim as an SSE `message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaChunk {
    pub content: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl DeltaChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: None,
        }
    }

    pub fn finished(reason: FinishReason) -> Self {
        Self {
            content: None,
            finish_reason: Some(reason),
        }
    }

    pub fn with_finish(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// A stop chunk ends the turn
    pub fn is_stop(&self) -> bool {
        self.finish_reason == Some(FinishReason::Stop)
    }
}
