use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coderag_llm::Embedder;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::indexer::Indexer;
use crate::walker::VCS_DIRS;

/// Re-runs an incremental refresh whenever files under the root change.
///
/// Events are debounced and coalesced: a burst of saves triggers one pass.
pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Start watching `root`. Changes under any of `ignored` (such as the
    /// index database itself) never trigger a pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<E: Embedder + 'static>(
        root: &Path,
        indexer: Arc<Indexer<E>>,
        debounce: Duration,
        ignored: Vec<PathBuf>,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);

        let mut debouncer = new_debouncer(
            debounce,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };
                let relevant = events
                    .iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any)
                    .any(|e| is_relevant(&e.path, &ignored));
                if relevant {
                    // A full channel means a pass is already queued.
                    let _ = notify_tx.try_send(());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        let root = root.to_path_buf();
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while notify_rx.recv().await.is_some() {
                match indexer.refresh(&root).await {
                    Ok(report) => tracing::info!(
                        added = report.files_added,
                        changed = report.files_changed,
                        removed = report.files_removed,
                        errors = report.errors.len(),
                        "index refreshed after file change"
                    ),
                    Err(e) => tracing::warn!(root = %root.display(), "refresh failed: {e}"),
                }
            }
        });

        Ok(Self { handle })
    }

    /// Stop watching and cancel any pass in progress.
    pub fn stop(self) {
        self.handle.abort();
    }
}

fn is_relevant(path: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|prefix| path.starts_with(prefix)) {
        return false;
    }
    !path
        .components()
        .any(|c| VCS_DIRS.iter().any(|d| c.as_os_str() == *d))
}

#[cfg(test)]
mod tests {
    use coderag_llm::mock::MockProvider;

    use super::*;
    use crate::indexer::IndexerConfig;
    use crate::store::VectorIndex;

    async fn create_test_indexer() -> Arc<Indexer<MockProvider>> {
        let index = VectorIndex::in_memory().await.unwrap();
        Arc::new(
            Indexer::new(index, Arc::new(MockProvider::default()), IndexerConfig::default())
                .unwrap(),
        )
    }

    #[test]
    fn vcs_and_ignored_paths_are_not_relevant() {
        let ignored = vec![PathBuf::from("/src/.coderag")];
        assert!(is_relevant(Path::new("/src/main.rs"), &ignored));
        assert!(!is_relevant(Path::new("/src/.git/index"), &ignored));
        assert!(!is_relevant(Path::new("/src/.coderag/index.db-wal"), &ignored));
    }

    #[tokio::test]
    async fn start_with_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = IndexWatcher::start(
            dir.path(),
            create_test_indexer().await,
            Duration::from_millis(50),
            Vec::new(),
        );
        assert!(watcher.is_ok());
        watcher.unwrap().stop();
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let result = IndexWatcher::start(
            Path::new("/nonexistent/path/xyz"),
            create_test_indexer().await,
            Duration::from_millis(50),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_change_triggers_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let indexer = create_test_indexer().await;
        let watcher = IndexWatcher::start(
            &root,
            Arc::clone(&indexer),
            Duration::from_millis(50),
            Vec::new(),
        )
        .unwrap();

        std::fs::write(root.join("new.py"), "print('hello')\n").unwrap();

        let mut indexed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if indexer.index().entry_count().await.unwrap() > 0 {
                indexed = true;
                break;
            }
        }
        watcher.stop();
        assert!(indexed, "watcher did not index the new file");
    }
}
