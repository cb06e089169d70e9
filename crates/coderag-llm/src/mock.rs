//! Test-only mock provider.
//!
//! Embeddings are deterministic: with a vocabulary configured, each text maps
//! to the per-word occurrence counts of that vocabulary, so texts sharing
//! words score high under cosine similarity and unrelated texts score zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{Completer, Embedder, Message};

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub vocabulary: Vec<String>,
    /// Returned for every text when `vocabulary` is empty.
    pub embedding: Vec<f32>,
    pub fail_chat: bool,
    /// Embedding fails for any text containing this marker.
    pub fail_embed_on: Option<String>,
    /// Milliseconds to sleep before returning a chat response.
    pub delay_ms: u64,
    embedded_texts: Arc<AtomicUsize>,
    chat_calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            vocabulary: Vec::new(),
            embedding: vec![1.0, 0.0, 0.0, 0.0],
            fail_chat: false,
            fail_embed_on: None,
            delay_ms: 0,
            embedded_texts: Arc::new(AtomicUsize::new(0)),
            chat_calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_vocabulary(words: &[&str]) -> Self {
        Self {
            vocabulary: words.iter().map(|w| (*w).to_lowercase()).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    #[must_use]
    pub fn with_embed_failure_on(mut self, marker: &str) -> Self {
        self.fail_embed_on = Some(marker.to_owned());
        self
    }

    /// Number of texts embedded so far, across all clones.
    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Prompts received by `complete`, oldest first.
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        if self.vocabulary.is_empty() {
            return self.embedding.clone();
        }
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        self.vocabulary
            .iter()
            .map(|v| {
                #[allow(clippy::cast_precision_loss)]
                let count = words.iter().filter(|w| **w == v.as_str()).count() as f32;
                count
            })
            .collect()
    }
}

impl Completer for MockProvider {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(LlmError::Unavailable("mock LLM error".into()));
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| LlmError::Other("mock response lock poisoned".into()))?;
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

impl Embedder for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if let Some(marker) = &self.fail_embed_on
            && text.contains(marker.as_str())
        {
            return Err(LlmError::Unavailable("mock embedding error".into()));
        }
        self.embedded_texts.fetch_add(1, Ordering::SeqCst);
        Ok(self.vectorize(text))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn embedding_model(&self) -> &str {
        "mock-embed"
    }
}
