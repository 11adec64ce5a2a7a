//! Errors raised while talking to the completion service

/// Completion service failure. Never retried; callers propagate it.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{env} not found in environment or auth.json")]
    MissingApiKey { env: String },
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("API request failed: {0}")]
    Send(#[source] reqwest::Error),
    #[error("API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("API error in stream: {message}")]
    Api { message: String },
    #[error("Stream read error: {0}")]
    Stream(#[source] reqwest::Error),
    #[error("Stream cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}
