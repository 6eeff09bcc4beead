//! Error types for the glider client.

use glider::model::ValidationError;

/// Everything a client operation can fail with.
///
/// `Cancelled` is not a failure: it marks a request the user aborted and must
/// never be shown as an error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("HTTP {status} {text}")]
    Status { status: u16, text: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    /// Transport-level failures the user may retry by hand.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Status { .. } | ClientError::Transport(_) | ClientError::Io(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ClientError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => ClientError::Status {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_string(),
            },
            None => ClientError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
