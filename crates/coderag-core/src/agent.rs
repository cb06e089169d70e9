//! Single entry point for answering questions about an indexed tree.

use std::sync::Arc;
use std::time::Duration;

use coderag_index::{Retriever, VectorIndex};
use coderag_llm::{Completer, Embedder, LlmError};

use crate::error::{AgentError, GenerationError};
use crate::synthesizer::{AnswerRecord, Synthesizer};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Chunks requested per query.
    pub top_k: usize,
    /// Budget for a whole `answer` call, retrieval and generation included.
    pub query_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            query_timeout: crate::Config::default().query_timeout(),
        }
    }
}

pub struct Agent<E: Embedder, C: Completer> {
    retriever: Retriever<E>,
    synthesizer: Synthesizer<C>,
    completer: Arc<C>,
    config: AgentConfig,
}

impl<E: Embedder, C: Completer> Agent<E, C> {
    #[must_use]
    pub fn new(
        retriever: Retriever<E>,
        synthesizer: Synthesizer<C>,
        completer: Arc<C>,
        config: AgentConfig,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            completer,
            config,
        }
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        self.retriever.index()
    }

    /// Answer `query` from the indexed sources.
    ///
    /// Never writes to the index; dropping the returned future cancels the
    /// in-flight backend call.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidQuery`] for a blank query,
    /// [`AgentError::NoIndex`] when nothing has been indexed yet, or the
    /// retrieval, generation or timeout failure. Each carries a
    /// [`AgentError::reason`] for display.
    pub async fn answer(&self, query: &str) -> Result<AnswerRecord, AgentError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::InvalidQuery("query is empty".into()));
        }

        let timeout = self.config.query_timeout;
        let result = tokio::time::timeout(timeout, self.answer_inner(query)).await;
        match result {
            Ok(Ok(record)) => {
                tracing::info!(
                    citations = record.citations.len(),
                    grounded = record.grounded,
                    "answered query"
                );
                Ok(record)
            }
            Ok(Err(e)) => {
                tracing::warn!(reason = e.reason(), "query failed: {e}");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(?timeout, "query timed out");
                Err(AgentError::Timeout(timeout))
            }
        }
    }

    async fn answer_inner(&self, query: &str) -> Result<AnswerRecord, AgentError> {
        let index = self.retriever.index();
        if index.file_count().await? == 0 && index.entry_count().await? == 0 {
            return Err(AgentError::NoIndex);
        }
        let retrieved = self.retriever.retrieve(query, self.config.top_k).await?;
        tracing::debug!(hits = retrieved.len(), "context retrieved");
        let record = self.synthesizer.synthesize(query, &retrieved.hits).await?;
        Ok(record)
    }

    /// Load the chat model ahead of the first query.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] if the backend cannot be reached.
    pub async fn warmup(&self) -> Result<(), GenerationError> {
        let started = std::time::Instant::now();
        self.completer.warmup().await.map_err(|e: LlmError| {
            tracing::warn!("model warmup failed: {e}");
            GenerationError::from(e)
        })?;
        tracing::info!(
            provider = self.completer.name(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "model warmed up"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use coderag_index::manifest::ManifestEntry;
    use coderag_index::{IndexEntry, IndexError, RetrievalConfig};
    use coderag_llm::RetryPolicy;
    use coderag_llm::mock::MockProvider;

    use super::*;
    use crate::synthesizer::{NO_CONTEXT_ANSWER, SynthesizerConfig};

    async fn seed(index: &VectorIndex, path: &str, content: &str, vector: Vec<f32>) {
        let entry = IndexEntry {
            seq: 0,
            chunk_id: format!("{path}#0"),
            file_path: path.into(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: content.len(),
            line_start: 1,
            line_end: 1,
            language: Some("python".into()),
            content: content.into(),
            file_hash: "h".into(),
            vector,
            indexed_at: 0,
        };
        let manifest = ManifestEntry {
            file_path: path.into(),
            content_hash: "h".into(),
            chunk_count: 1,
            size: content.len() as u64,
            modified_at: 0,
            indexed_at: 0,
        };
        index.replace_file(path, &[entry], &manifest).await.unwrap();
    }

    fn agent(index: VectorIndex, mock: MockProvider, config: AgentConfig) -> Agent<MockProvider, MockProvider> {
        let provider = Arc::new(mock);
        let retriever = Retriever::new(
            index,
            Arc::clone(&provider),
            RetrievalConfig {
                retry: RetryPolicy::none(),
                ..RetrievalConfig::default()
            },
        );
        let synthesizer = Synthesizer::new(
            Arc::clone(&provider),
            SynthesizerConfig {
                retry: RetryPolicy::none(),
                ..SynthesizerConfig::default()
            },
        );
        Agent::new(retriever, synthesizer, provider, config)
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let index = VectorIndex::in_memory().await.unwrap();
        let agent = agent(index, MockProvider::default(), AgentConfig::default());
        let err = agent.answer("   ").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidQuery(_)));
        assert_eq!(err.reason(), "invalid request");
    }

    #[tokio::test]
    async fn empty_index_reports_no_index() {
        let index = VectorIndex::in_memory().await.unwrap();
        let mock = MockProvider::default();
        let agent = agent(index, mock.clone(), AgentConfig::default());
        let err = agent.answer("what does foo do?").await.unwrap_err();
        assert!(matches!(err, AgentError::NoIndex));
        assert_eq!(mock.embedded_texts(), 0);
        assert_eq!(mock.chat_calls(), 0);
    }

    #[tokio::test]
    async fn index_of_empty_files_is_not_missing() {
        let index = VectorIndex::in_memory().await.unwrap();
        let manifest = ManifestEntry {
            file_path: "empty.py".into(),
            content_hash: "h".into(),
            chunk_count: 0,
            size: 0,
            modified_at: 0,
            indexed_at: 0,
        };
        index.replace_file("empty.py", &[], &manifest).await.unwrap();
        let mock = MockProvider::default();
        let agent = agent(index, mock.clone(), AgentConfig::default());

        let record = agent.answer("what does foo do?").await.unwrap();
        assert!(!record.grounded);
        assert!(record.citations.is_empty());
        assert_eq!(record.answer, NO_CONTEXT_ANSWER);
        assert_eq!(mock.chat_calls(), 0);
    }

    #[tokio::test]
    async fn answers_with_citations() {
        let index = VectorIndex::in_memory().await.unwrap();
        seed(&index, "a.py", "def foo(): return 1", vec![1.0, 0.0]).await;
        seed(&index, "b.py", "def bar(): return 2", vec![0.0, 1.0]).await;
        let mock = MockProvider::with_vocabulary(&["foo", "bar"]);
        let agent = agent(index, mock, AgentConfig::default());

        let record = agent.answer("What does foo do?").await.unwrap();
        assert!(record.grounded);
        assert_eq!(record.query, "What does foo do?");
        assert_eq!(record.cited_paths(), vec!["a.py"]);
    }

    #[tokio::test]
    async fn unmatched_query_returns_no_context_record() {
        let index = VectorIndex::in_memory().await.unwrap();
        seed(&index, "a.py", "def foo(): return 1", vec![1.0, 0.0]).await;
        let mock = MockProvider::with_vocabulary(&["foo", "bar"]);
        let agent = agent(index, mock.clone(), AgentConfig::default());

        let record = agent.answer("how is logging configured?").await.unwrap();
        assert!(!record.grounded);
        assert_eq!(record.answer, NO_CONTEXT_ANSWER);
        assert_eq!(mock.chat_calls(), 0);
    }

    #[tokio::test]
    async fn embedding_outage_is_typed() {
        let index = VectorIndex::in_memory().await.unwrap();
        seed(&index, "a.py", "def foo(): return 1", vec![1.0, 0.0, 0.0, 0.0]).await;
        let mock = MockProvider::default().with_embed_failure_on("foo");
        let agent = agent(index, mock, AgentConfig::default());

        let err = agent.answer("foo?").await.unwrap_err();
        assert!(matches!(err, AgentError::Retrieval(IndexError::Embedding(_))));
        assert_eq!(err.reason(), "embedding backend unreachable");
    }

    #[tokio::test]
    async fn model_outage_is_typed() {
        let index = VectorIndex::in_memory().await.unwrap();
        seed(&index, "a.py", "def foo(): return 1", vec![1.0, 0.0, 0.0, 0.0]).await;
        let agent = agent(index, MockProvider::failing(), AgentConfig::default());

        let err = agent.answer("foo?").await.unwrap_err();
        assert_eq!(err.reason(), "model backend unreachable");
    }

    #[tokio::test]
    async fn overall_timeout_applies() {
        let index = VectorIndex::in_memory().await.unwrap();
        seed(&index, "a.py", "def foo(): return 1", vec![1.0, 0.0, 0.0, 0.0]).await;
        let config = AgentConfig {
            query_timeout: Duration::from_millis(30),
            ..AgentConfig::default()
        };
        let agent = agent(index, MockProvider::default().with_delay(1_000), config);

        let err = agent.answer("foo?").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
        assert_eq!(err.reason(), "query timed out");
    }

    #[tokio::test]
    async fn warmup_succeeds_for_mock() {
        let index = VectorIndex::in_memory().await.unwrap();
        let agent = agent(index, MockProvider::default(), AgentConfig::default());
        assert!(agent.warmup().await.is_ok());
    }
}
