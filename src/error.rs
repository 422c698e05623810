// src/error.rs
// Error types for the forest relay

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the forest library
#[derive(Error, Debug)]
pub enum ForestError {
    #[error("invalid context payload: {0}")]
    InvalidContext(#[source] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("stream decode error: {0}")]
    Decode(String),

    #[error("completion cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience type alias for Result using ForestError
pub type Result<T> = std::result::Result<T, ForestError>;

impl ForestError {
    /// HTTP status a handler answers with when this error escapes it
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForestError::InvalidContext(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ForestError::Cancelled)
    }
}

impl IntoResponse for ForestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
