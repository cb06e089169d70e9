//! Error types for coderag-index.

use coderag_llm::LlmError;

/// Errors that can occur while building or querying the index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Invalid configuration or unusable source root.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Transient embedding backend failure; retrying may succeed.
    #[error("embedding backend error: {0}")]
    Embedding(LlmError),

    /// Embedding failure that retrying will not fix.
    #[error("embedding failed: {0}")]
    EmbeddingFatal(String),

    /// Vector length differs from the dimension fixed by the index.
    #[error("dimension mismatch: index stores {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(String),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}

impl From<LlmError> for IndexError {
    fn from(err: LlmError) -> Self {
        if err.is_transient() {
            Self::Embedding(err)
        } else {
            Self::EmbeddingFatal(err.to_string())
        }
    }
}

impl IndexError {
    /// Whether the failed operation is worth retrying on a later pass.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Io(_))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn transient_llm_error_maps_to_embedding() {
        let err: IndexError = LlmError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, IndexError::Embedding(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn fatal_llm_error_maps_to_embedding_fatal() {
        let err: IndexError = LlmError::BatchSizeMismatch {
            expected: 2,
            actual: 1,
        }
        .into();
        assert!(matches!(err, IndexError::EmbeddingFatal(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn dimension_mismatch_message() {
        let err = IndexError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch: index stores 384-d vectors, got 768"
        );
    }
}
