use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Maps text to fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or replies with no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed several texts, returning vectors in input order.
    ///
    /// Backends with a native batch endpoint override this; the default
    /// issues one request per text.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    fn embed_many(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Identifier of the embedding model, recorded alongside the index.
    fn embedding_model(&self) -> &str;
}

/// Produces a text completion for a prompt.
pub trait Completer: Send + Sync {
    /// Send the prompt messages and return the assistant reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to communicate or the reply is invalid.
    fn complete(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Pre-load the model so the first real request does not pay for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the warmup request.
    fn warmup(&self) -> impl Future<Output = Result<(), LlmError>> + Send {
        async { Ok(()) }
    }

    fn name(&self) -> &str;
}
