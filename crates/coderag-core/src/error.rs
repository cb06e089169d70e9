use std::time::Duration;

use coderag_index::IndexError;
use coderag_llm::LlmError;

/// Failure to turn retrieved context into an answer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model backend unreachable: {0}")]
    Unreachable(LlmError),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned an empty answer")]
    EmptyReply,
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(d) => Self::Timeout(d),
            LlmError::EmptyResponse { .. } => Self::EmptyReply,
            other => Self::Unreachable(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no index available; run an indexing pass first")]
    NoIndex,

    #[error(transparent)]
    Retrieval(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl AgentError {
    /// Short explanation suitable for showing to the person who asked.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid request",
            Self::NoIndex => "no index available",
            Self::Retrieval(IndexError::Embedding(_) | IndexError::EmbeddingFatal(_)) => {
                "embedding backend unreachable"
            }
            Self::Retrieval(IndexError::DimensionMismatch { .. }) => {
                "index was built with a different embedding model"
            }
            Self::Retrieval(_) => "index unavailable",
            Self::Generation(GenerationError::Timeout(_)) | Self::Timeout(_) => "query timed out",
            Self::Generation(_) => "model backend unreachable",
        }
    }
}
