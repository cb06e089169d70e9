use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("expected {expected} embeddings, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, rate limits, server-side errors and
    /// empty replies are transient. Malformed payloads, unsupported
    /// capabilities and batch shape errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_)
            | Self::RateLimited
            | Self::Unavailable(_)
            | Self::Timeout(_)
            | Self::EmptyResponse { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_)
            | Self::EmbedUnsupported { .. }
            | Self::BatchSizeMismatch { .. }
            | Self::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
