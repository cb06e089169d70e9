mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use coderag_index::WalkerConfig;
use coderag_index::chunker::ChunkerConfig as ChunkSizes;

use crate::agent::AgentConfig;
use crate::synthesizer::SynthesizerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting values fail [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<Self>(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component could run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunker.size == 0 {
            return Err(ConfigError::Invalid("chunker.size must be > 0".into()));
        }
        if self.chunker.overlap >= self.chunker.size {
            return Err(ConfigError::Invalid(format!(
                "chunker.overlap ({}) must be smaller than chunker.size ({})",
                self.chunker.overlap, self.chunker.size
            )));
        }
        if self.indexer.batch_size == 0 || self.indexer.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "indexer.batch_size and indexer.concurrency must be > 0".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be > 0".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.score_threshold ({}) must lie in [-1, 1]",
                self.retrieval.score_threshold
            )));
        }
        if self.synthesis.context_budget == 0 {
            return Err(ConfigError::Invalid(
                "synthesis.context_budget must be > 0".into(),
            ));
        }
        if self.timeouts.embedding_seconds == 0
            || self.timeouts.generation_seconds == 0
            || self.timeouts.query_seconds == Some(0)
        {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if let Some(query) = self.timeouts.query_seconds {
            let budget = self.retry_budget();
            if Duration::from_secs(query) < budget {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.query_seconds ({query}) must cover the retry budget of {}s",
                    budget.as_secs_f64().ceil()
                )));
            }
        }
        if self.llm.provider == ProviderKind::Compatible && self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "llm.base_url is required for the compatible provider".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn indexer_config(&self) -> coderag_index::IndexerConfig {
        coderag_index::IndexerConfig {
            walker: WalkerConfig {
                exclude: self.source.exclude.clone(),
                max_file_size: self.source.max_file_size,
                respect_gitignore: self.source.respect_gitignore,
                include_hidden: self.source.include_hidden,
            },
            chunker: ChunkSizes {
                target_size: self.chunker.size,
                overlap: self.chunker.overlap,
            },
            embed_batch_size: self.indexer.batch_size,
            embed_concurrency: self.indexer.concurrency,
            embed_timeout: self.timeouts.embedding(),
            retry: self.retry.policy(),
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> coderag_index::RetrievalConfig {
        coderag_index::RetrievalConfig {
            top_k: self.retrieval.top_k,
            score_threshold: self.retrieval.score_threshold,
            embed_timeout: self.timeouts.embedding(),
            retry: self.retry.policy(),
        }
    }

    #[must_use]
    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            context_budget: self.synthesis.context_budget,
            max_citations: self.synthesis.max_citations,
            timeout: self.timeouts.generation(),
            retry: self.retry.policy(),
        }
    }

    /// Longest an answer can take when every embedding and generation
    /// attempt runs to its timeout, backoff included.
    #[must_use]
    pub fn retry_budget(&self) -> Duration {
        let policy = self.retry.policy();
        let attempts = policy.max_retries.saturating_add(1);
        let backoff: Duration = (0..policy.max_retries).map(|a| policy.delay(a)).sum();
        let phase = |timeout: Duration| timeout.saturating_mul(attempts).saturating_add(backoff);
        phase(self.timeouts.embedding()).saturating_add(phase(self.timeouts.generation()))
    }

    /// The configured query timeout, or [`Config::retry_budget`] when unset.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        self.timeouts
            .query_seconds
            .map_or_else(|| self.retry_budget(), Duration::from_secs)
    }

    #[must_use]
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            top_k: self.retrieval.top_k,
            query_timeout: self.query_timeout(),
        }
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }
}
