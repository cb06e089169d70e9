//! Grounded answer generation from retrieved chunks.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use coderag_index::SearchHit;
use coderag_index::retriever::format_hit;
use coderag_llm::retry::{RetryPolicy, with_retry, with_timeout};
use coderag_llm::{Completer, LlmError, Message};
use serde::Serialize;

use crate::error::GenerationError;

pub const NO_CONTEXT_ANSWER: &str = "I couldn't find relevant information in the provided sources.";

const SYSTEM_PROMPT: &str = "You are a code assistant that ONLY answers based on provided context. \
Never use external knowledge. If the context doesn't contain the answer, say so.";

const PROMPT_RULES: &str = "You are a code analysis assistant. Your ONLY job is to answer questions \
using EXCLUSIVELY the context information provided below. You MUST NOT use any external knowledge, \
pre-training, or information about other projects.\n\n\
CRITICAL RULES:\n\
1. ONLY use information explicitly stated in the Context section below\n\
2. If the Context does not contain the answer, you MUST respond: \
'I couldn't find relevant information in the provided sources.'\n\
3. DO NOT use your general knowledge about programming, frameworks, or other projects\n\
4. DO NOT make assumptions or inferences beyond what is explicitly stated\n\
5. When referencing code, quote the actual file paths from the context\n\
6. If you're unsure, say so rather than guessing\n\n";

const SEPARATOR: &str = "--------------------";

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Characters of rendered context allowed in the prompt.
    pub context_budget: usize,
    /// Distinct files listed under "Sources".
    pub max_citations: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            context_budget: 12_000,
            max_citations: 5,
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// A chunk the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    pub query: String,
    pub answer: String,
    /// One per distinct file, most relevant first.
    pub citations: Vec<Citation>,
    /// False when no context reached the model.
    pub grounded: bool,
}

impl AnswerRecord {
    #[must_use]
    pub fn cited_paths(&self) -> Vec<&str> {
        self.citations.iter().map(|c| c.file_path.as_str()).collect()
    }
}

pub struct Synthesizer<C: Completer> {
    completer: Arc<C>,
    config: SynthesizerConfig,
}

impl<C: Completer> Synthesizer<C> {
    #[must_use]
    pub fn new(completer: Arc<C>, config: SynthesizerConfig) -> Self {
        Self { completer, config }
    }

    #[must_use]
    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Answer `query` from `hits` only.
    ///
    /// With no hits the model is not called and the record says so.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] if the backend is unreachable, times out
    /// after retries, or replies with nothing.
    pub async fn synthesize(
        &self,
        query: &str,
        hits: &[SearchHit],
    ) -> Result<AnswerRecord, GenerationError> {
        if hits.is_empty() {
            tracing::debug!("no context retrieved, skipping generation");
            return Ok(AnswerRecord {
                query: query.to_owned(),
                answer: NO_CONTEXT_ANSWER.to_owned(),
                citations: Vec::new(),
                grounded: false,
            });
        }

        let mut ordered: Vec<&SearchHit> = hits.iter().collect();
        ordered.sort_by(|a, b| b.score.total_cmp(&a.score));

        let (context, packed) = pack_context(&ordered, self.config.context_budget);
        let citations = collect_citations(&packed, self.config.max_citations);
        let messages = build_prompt(query, &context);

        tracing::debug!(
            hits = hits.len(),
            packed = packed.len(),
            context_chars = context.len(),
            "generating answer"
        );

        let completer = self.completer.as_ref();
        let timeout = self.config.timeout;
        let messages = messages.as_slice();
        let reply = with_retry("generate answer", &self.config.retry, || async move {
            let text = with_timeout(timeout, completer.complete(messages)).await?;
            if text.trim().is_empty() {
                return Err(LlmError::EmptyResponse {
                    provider: completer.name().to_owned(),
                });
            }
            Ok(text)
        })
        .await?;

        Ok(AnswerRecord {
            query: query.to_owned(),
            answer: append_sources(reply.trim(), &citations),
            citations,
            grounded: true,
        })
    }
}

/// Render hits in order until `budget` characters are used. The first hit is
/// always included, cut to the budget if it alone is too large.
fn pack_context<'a>(ordered: &[&'a SearchHit], budget: usize) -> (String, Vec<&'a SearchHit>) {
    let mut context = String::new();
    let mut packed = Vec::new();
    for hit in ordered {
        let block = format_hit(hit);
        if context.len() + block.len() > budget {
            if packed.is_empty() {
                context.push_str(truncate_at_char(&block, budget));
                packed.push(*hit);
            }
            break;
        }
        context.push_str(&block);
        packed.push(*hit);
    }
    (context, packed)
}

fn truncate_at_char(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn collect_citations(packed: &[&SearchHit], max: usize) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for hit in packed {
        if citations.len() >= max {
            break;
        }
        if citations.iter().any(|c| c.file_path == hit.entry.file_path) {
            continue;
        }
        citations.push(Citation {
            file_path: hit.entry.file_path.clone(),
            line_start: hit.entry.line_start,
            line_end: hit.entry.line_end,
            chunk_id: hit.entry.chunk_id.clone(),
            score: hit.score,
        });
    }
    citations
}

fn build_prompt(query: &str, context: &str) -> Vec<Message> {
    let mut user = String::with_capacity(PROMPT_RULES.len() + context.len() + query.len() + 128);
    user.push_str(PROMPT_RULES);
    user.push_str("Context from the project source code:\n");
    let _ = writeln!(user, "{SEPARATOR}");
    user.push_str(context.trim_end());
    let _ = write!(user, "\n{SEPARATOR}\n\n");
    let _ = write!(user, "User Question: {query}\n\n");
    user.push_str("Answer based ONLY on the context above:");
    vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
}

fn append_sources(answer: &str, citations: &[Citation]) -> String {
    let mut out = answer.to_owned();
    if citations.is_empty() {
        return out;
    }
    out.push_str("\n\nSources:\n");
    for c in citations {
        let _ = writeln!(out, "- {}", c.file_path);
    }
    out
}
