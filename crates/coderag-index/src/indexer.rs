//! Incremental indexing orchestrator: walk → diff → chunk → embed → store.
//!
//! A refresh pass moves through `scanning`, `diffing`, `updating` and
//! `committed`. Only files whose content hash differs from the manifest are
//! re-chunked and re-embedded, and each file's entries are swapped in one
//! transaction together with its manifest row, so an interrupted pass leaves
//! the index consistent and the next pass picks up where it stopped.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coderag_llm::Embedder;
use coderag_llm::retry::{RetryPolicy, with_retry, with_timeout};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::Mutex;

use crate::chunker::{Chunk, ChunkerConfig, chunk_file};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::manifest::{IndexManifest, ManifestEntry};
use crate::store::{IndexEntry, VectorIndex};
use crate::walker::{SourceFile, Walker, WalkerConfig};

const DIMENSION_CHECK_TEXT: &str = "dimension check";

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub walker: WalkerConfig,
    pub chunker: ChunkerConfig,
    /// Texts per embedding request.
    pub embed_batch_size: usize,
    /// Embedding requests in flight at once.
    pub embed_concurrency: usize,
    /// Deadline for a single embedding request.
    pub embed_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            walker: WalkerConfig::default(),
            chunker: ChunkerConfig::default(),
            embed_batch_size: 16,
            embed_concurrency: 4,
            embed_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// A file whose update failed; it keeps its previous entries and is retried
/// on the next pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: String,
    pub message: String,
    pub transient: bool,
}

/// Summary of a refresh pass.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_added: usize,
    pub files_changed: usize,
    pub files_removed: usize,
    pub files_unchanged: usize,
    /// Files whose entries were rewritten successfully.
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub chunks_removed: usize,
    pub errors: Vec<FileError>,
    /// A stored dimension disagrees with the embedding backend.
    pub needs_rebuild: bool,
    pub duration_ms: u64,
}

impl IndexReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.needs_rebuild
    }
}

/// Builds and refreshes a [`VectorIndex`] from a source tree.
///
/// Passes are serialized: concurrent calls wait for the running pass.
pub struct Indexer<E: Embedder> {
    index: VectorIndex,
    embedder: Arc<E>,
    config: IndexerConfig,
    write_lock: Mutex<()>,
}

impl<E: Embedder> Indexer<E> {
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if the chunker or batching settings are invalid.
    pub fn new(index: VectorIndex, embedder: Arc<E>, config: IndexerConfig) -> Result<Self> {
        config.chunker.validate()?;
        if config.embed_batch_size == 0 || config.embed_concurrency == 0 {
            return Err(IndexError::Config(
                "embed_batch_size and embed_concurrency must be > 0".into(),
            ));
        }
        Ok(Self {
            index,
            embedder,
            config,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Bring the index in line with the tree under `root`.
    ///
    /// Per-file failures are collected in [`IndexReport::errors`] and do not
    /// abort the pass.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] for an unusable root,
    /// [`IndexError::DimensionMismatch`] when the backend's vectors no longer
    /// fit the stored index, or a database error. An unreachable backend is
    /// reported per file; deletions are still applied.
    pub async fn refresh(&self, root: &Path) -> Result<IndexReport> {
        let _guard = self.write_lock.lock().await;
        self.refresh_locked(root).await
    }

    /// Drop everything and index `root` from scratch.
    ///
    /// # Errors
    ///
    /// See [`Indexer::refresh`].
    pub async fn rebuild(&self, root: &Path) -> Result<IndexReport> {
        let _guard = self.write_lock.lock().await;
        tracing::info!(root = %root.display(), "rebuilding index from scratch");
        self.index.clear().await?;
        self.refresh_locked(root).await
    }

    /// Refresh a single path, e.g. after a filesystem event.
    ///
    /// A path that no longer exists, or that the walker would skip, is
    /// removed from the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is unusable or the update fails.
    pub async fn reindex_file(&self, root: &Path, abs_path: &Path) -> Result<IndexReport> {
        let _guard = self.write_lock.lock().await;
        let start = Instant::now();
        let walker = Walker::new(root, self.config.walker.clone())?;
        let abs_path = resolve(abs_path);
        let Some(rel_path) = walker.relative_path(&abs_path) else {
            return Err(IndexError::Config(format!(
                "{} is outside the source root",
                abs_path.display()
            )));
        };

        let mut report = IndexReport::default();
        let file = if abs_path.is_file() {
            walker.load(&abs_path)?
        } else {
            None
        };

        match file {
            Some(file) => {
                report.files_scanned = 1;
                let manifest = IndexManifest::from_entries(self.index.manifest_entries().await?);
                if manifest.is_current(&file) {
                    report.files_unchanged = 1;
                } else {
                    if manifest.get(&file.path).is_some() {
                        report.files_changed = 1;
                    } else {
                        report.files_added = 1;
                    }
                    self.apply_update(&file, 1, 1, &mut report).await;
                }
            }
            None => {
                let known = self
                    .index
                    .manifest_entries()
                    .await?
                    .iter()
                    .any(|e| e.file_path == rel_path);
                let removed = self.index.remove_file(&rel_path).await?;
                if known || removed > 0 {
                    report.files_removed = 1;
                    report.chunks_removed = removed;
                    tracing::info!(file = %rel_path, chunks = removed, "removed");
                }
            }
        }

        report.duration_ms = elapsed_ms(start);
        Ok(report)
    }

    async fn refresh_locked(&self, root: &Path) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport::default();

        let walker = Walker::new(root, self.config.walker.clone())?;
        let manifest = IndexManifest::load(&self.index).await?;
        tracing::info!(state = "scanning", root = %walker.root().display(), known = manifest.len());

        let delta = tokio::task::spawn_blocking(move || manifest.diff(walker.files())).await?;
        report.files_added = delta.added.len();
        report.files_changed = delta.changed.len();
        report.files_removed = delta.removed.len();
        report.files_unchanged = delta.unchanged;
        report.files_scanned = delta.unchanged + delta.pending_updates();
        tracing::info!(
            state = "diffing",
            added = report.files_added,
            changed = report.files_changed,
            removed = report.files_removed,
            unchanged = report.files_unchanged,
        );

        for path in &delta.removed {
            match self.index.remove_file(path).await {
                Ok(n) => {
                    report.chunks_removed += n;
                    tracing::info!(file = %path, chunks = n, "removed");
                }
                Err(e) => report.errors.push(FileError {
                    path: path.clone(),
                    message: e.to_string(),
                    transient: e.is_transient(),
                }),
            }
        }

        if delta.pending_updates() > 0 {
            match self.check_dimensions().await {
                Ok(()) => {}
                Err(e @ IndexError::DimensionMismatch { .. }) => return Err(e),
                // Each file's update will surface its own failure.
                Err(e) => tracing::warn!("dimension check failed, continuing: {e}"),
            }
        }

        let total = delta.pending_updates();
        let mut pending: Vec<SourceFile> = delta.added.into_iter().chain(delta.changed).collect();
        pending.sort_by(|a, b| a.path.cmp(&b.path));
        for (i, file) in pending.iter().enumerate() {
            self.apply_update(file, i + 1, total, &mut report).await;
        }

        report.duration_ms = elapsed_ms(start);
        tracing::info!(
            state = "committed",
            chunks_created = report.chunks_created,
            chunks_removed = report.chunks_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
        );
        Ok(report)
    }

    /// Fail fast when the backend's vectors no longer match the stored dimension.
    async fn check_dimensions(&self) -> Result<()> {
        let Some(expected) = self.index.dimensions().await? else {
            return Ok(());
        };
        let sample = self.embed_batch(vec![DIMENSION_CHECK_TEXT.to_owned()]).await?;
        let actual = sample.first().map_or(0, Vec::len);
        if actual != expected {
            tracing::error!(
                expected,
                actual,
                model = self.embedder.embedding_model(),
                "embedding dimension changed, a full rebuild is required"
            );
            return Err(IndexError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    async fn apply_update(
        &self,
        file: &SourceFile,
        position: usize,
        total: usize,
        report: &mut IndexReport,
    ) {
        match self.update_file(file).await {
            Ok(created) => {
                report.files_indexed += 1;
                report.chunks_created += created;
                tracing::info!(
                    state = "updating",
                    file = %file.path,
                    progress = format_args!("{position}/{total}"),
                    chunks = created,
                );
            }
            Err(e) => {
                if matches!(e, IndexError::DimensionMismatch { .. }) {
                    report.needs_rebuild = true;
                }
                tracing::warn!(file = %file.path, "update failed, will retry next pass: {e}");
                report.errors.push(FileError {
                    path: file.path.clone(),
                    message: e.to_string(),
                    transient: e.is_transient(),
                });
            }
        }
    }

    async fn update_file(&self, file: &SourceFile) -> Result<usize> {
        let chunks = chunk_file(file, &self.config.chunker)?;
        let texts: Vec<String> = chunks.iter().map(contextualize_for_embedding).collect();
        let vectors = self.embed_all(texts).await?;

        let indexed_at = chrono::Utc::now().timestamp();
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| to_entry(chunk, &file.content_hash, vector, indexed_at))
            .collect();
        let manifest = ManifestEntry {
            file_path: file.path.clone(),
            content_hash: file.content_hash.clone(),
            chunk_count: entries.len(),
            size: file.size,
            modified_at: file.modified_at,
            indexed_at,
        };

        self.index
            .replace_file(&file.path, &entries, &manifest)
            .await?;
        Ok(entries.len())
    }

    /// Embed all texts in batches with bounded parallelism, preserving order.
    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<Vec<String>> = texts
            .chunks(self.config.embed_batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffered(self.config.embed_concurrency)
            .try_collect()
            .await?;
        Ok(results.into_iter().flatten().collect())
    }

    async fn embed_batch(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let vectors = with_retry("embed", &self.config.retry, || {
            with_timeout(self.config.embed_timeout, self.embedder.embed_many(&batch))
        })
        .await?;
        if vectors.len() != batch.len() {
            return Err(IndexError::EmbeddingFatal(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

fn to_entry(chunk: &Chunk, file_hash: &str, vector: Vec<f32>, indexed_at: i64) -> IndexEntry {
    IndexEntry {
        seq: 0,
        chunk_id: chunk.id.clone(),
        file_path: chunk.file_path.clone(),
        chunk_index: chunk.index,
        start_offset: chunk.start,
        end_offset: chunk.end,
        line_start: chunk.line_start,
        line_end: chunk.line_end,
        language: chunk.language.map(|l| l.id().to_owned()),
        content: chunk.text.clone(),
        file_hash: file_hash.to_owned(),
        vector,
        indexed_at,
    }
}

/// Canonicalize `path`, falling back to its canonical parent for paths that
/// no longer exist.
fn resolve(path: &Path) -> std::path::PathBuf {
    if let Ok(path) = path.canonicalize() {
        return path;
    }
    match (path.parent().map(Path::canonicalize), path.file_name()) {
        (Some(Ok(parent)), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
