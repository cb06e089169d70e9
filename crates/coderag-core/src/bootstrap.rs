//! Wiring: config to provider, index, indexer and agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use coderag_index::watcher::IndexWatcher;
use coderag_index::{IndexError, Indexer, Retriever, VectorIndex};
use coderag_llm::any::AnyProvider;
use coderag_llm::compatible::CompatibleProvider;
use coderag_llm::ollama::OllamaProvider;
use coderag_llm::{Completer, Embedder};

use crate::agent::Agent;
use crate::config::{Config, ProviderKind};
use crate::synthesizer::Synthesizer;

const MEMORY_STORAGE: &str = ":memory:";

#[must_use]
pub fn create_provider(config: &Config) -> AnyProvider {
    let llm = &config.llm;
    match llm.provider {
        ProviderKind::Ollama => AnyProvider::Ollama(
            OllamaProvider::new(&llm.base_url, llm.model.clone(), llm.embedding_model.clone())
                .with_temperature(llm.temperature)
                .with_context_window(llm.context_window),
        ),
        ProviderKind::Compatible => AnyProvider::Compatible(
            CompatibleProvider::new(
                "compatible".into(),
                llm.api_key.clone(),
                llm.base_url.clone(),
                llm.model.clone(),
                Some(llm.embedding_model.clone()),
            )
            .with_temperature(llm.temperature)
            .with_max_tokens(llm.max_tokens),
        ),
    }
}

/// Open the index named by `storage.path`, creating it if missing.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated.
pub async fn open_index(config: &Config) -> Result<VectorIndex, IndexError> {
    VectorIndex::open(&config.storage.path).await
}

/// A configured index plus the backend both phases talk to.
pub struct App<P> {
    config: Config,
    index: VectorIndex,
    provider: Arc<P>,
}

impl App<AnyProvider> {
    /// Build from config: the provider it names and the index it points at.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be opened.
    pub async fn from_config(config: Config) -> Result<Self, IndexError> {
        let provider = create_provider(&config);
        let index = open_index(&config).await?;
        tracing::info!(
            provider = provider.name(),
            embedding_model = provider.embedding_model(),
            storage = %config.storage.path,
            "application initialized"
        );
        Ok(Self::with_provider(config, index, provider))
    }
}

impl<P: Embedder + Completer + 'static> App<P> {
    #[must_use]
    pub fn with_provider(config: Config, index: VectorIndex, provider: P) -> Self {
        Self {
            config,
            index,
            provider: Arc::new(provider),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    #[must_use]
    pub fn source_root(&self) -> &Path {
        &self.config.source.path
    }

    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if chunking or batching settings are
    /// unusable.
    pub fn indexer(&self) -> Result<Indexer<P>, IndexError> {
        Indexer::new(
            self.index.clone(),
            Arc::clone(&self.provider),
            self.config.indexer_config(),
        )
    }

    #[must_use]
    pub fn agent(&self) -> Agent<P, P> {
        let retriever = Retriever::new(
            self.index.clone(),
            Arc::clone(&self.provider),
            self.config.retrieval_config(),
        );
        let synthesizer =
            Synthesizer::new(Arc::clone(&self.provider), self.config.synthesizer_config());
        Agent::new(
            retriever,
            synthesizer,
            Arc::clone(&self.provider),
            self.config.agent_config(),
        )
    }

    /// Keep the index in step with the source tree until stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the indexer cannot be built or the watcher fails
    /// to start.
    pub fn watch(&self) -> Result<(Arc<Indexer<P>>, IndexWatcher), IndexError> {
        let indexer = Arc::new(self.indexer()?);
        let watcher = IndexWatcher::start(
            self.source_root(),
            Arc::clone(&indexer),
            self.config.debounce(),
            self.storage_dirs(),
        )?;
        Ok((indexer, watcher))
    }

    /// Directories whose changes must not trigger a refresh.
    fn storage_dirs(&self) -> Vec<PathBuf> {
        if self.config.storage.path == MEMORY_STORAGE {
            return Vec::new();
        }
        Path::new(&self.config.storage.path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .and_then(|p| p.canonicalize().ok())
            .into_iter()
            .collect()
    }
}
