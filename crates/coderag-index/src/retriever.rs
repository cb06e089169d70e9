//! Query-time semantic search over the index.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use coderag_llm::Embedder;
use coderag_llm::retry::{RetryPolicy, with_retry, with_timeout};

use crate::error::Result;
use crate::store::{SearchHit, VectorIndex};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Hits requested from the index before thresholding.
    pub top_k: usize,
    /// Minimum cosine similarity to accept.
    pub score_threshold: f32,
    /// Deadline for embedding the query.
    pub embed_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_threshold: 0.25,
            embed_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Hits ordered by descending score. May be empty.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<SearchHit>,
}

impl RetrievalResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

pub struct Retriever<E: Embedder> {
    index: VectorIndex,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<E: Embedder> Retriever<E> {
    #[must_use]
    pub fn new(index: VectorIndex, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Embed `query` and return up to `k` hits scoring at least the threshold.
    ///
    /// Never writes to the index.
    ///
    /// # Errors
    ///
    /// Returns an embedding error if the backend fails after retries,
    /// [`crate::IndexError::DimensionMismatch`] if the query vector does not
    /// fit the index, or a database error.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        let vector = with_retry("embed query", &self.config.retry, || {
            with_timeout(self.config.embed_timeout, self.embedder.embed(query))
        })
        .await?;

        let mut hits = self.index.search(&vector, k).await?;
        let found = hits.len();
        hits.retain(|h| h.score >= self.config.score_threshold);
        tracing::debug!(found, kept = hits.len(), "retrieved");
        Ok(RetrievalResult { hits })
    }
}

/// Render hits as a prompt context block, one fenced section per hit.
#[must_use]
pub fn format_as_context(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for hit in hits {
        out.push_str(&format_hit(hit));
    }
    out
}

/// A single hit as a `path:start-end` header followed by its fenced content.
#[must_use]
pub fn format_hit(hit: &SearchHit) -> String {
    let entry = &hit.entry;
    let mut out = String::with_capacity(entry.content.len() + 64);
    let _ = writeln!(
        out,
        "### {}:{}-{} (score {:.2})",
        entry.file_path, entry.line_start, entry.line_end, hit.score
    );
    let _ = writeln!(out, "```{}", entry.language.as_deref().unwrap_or_default());
    out.push_str(&entry.content);
    if !entry.content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n\n");
    out
}
