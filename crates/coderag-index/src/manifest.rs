//! Per-file record of what the index was built from, and the delta against
//! a fresh walk.

use std::collections::{BTreeSet, HashMap};

use crate::error::Result;
use crate::store::VectorIndex;
use crate::walker::SourceFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_path: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub size: u64,
    /// Source file mtime, unix seconds.
    pub modified_at: i64,
    /// Unix seconds.
    pub indexed_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct IndexManifest {
    entries: HashMap<String, ManifestEntry>,
    /// Paths holding chunks without a manifest row.
    orphans: BTreeSet<String>,
}

/// Files to update after comparing a walk with the manifest.
#[derive(Debug, Default)]
pub struct Delta {
    pub added: Vec<SourceFile>,
    pub changed: Vec<SourceFile>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Number of files that need chunking and embedding.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.added.len() + self.changed.len()
    }
}

impl IndexManifest {
    /// Read the manifest rows persisted alongside the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load(index: &VectorIndex) -> Result<Self> {
        let entries: HashMap<String, ManifestEntry> = index
            .manifest_entries()
            .await?
            .into_iter()
            .map(|e| (e.file_path.clone(), e))
            .collect();
        let orphans = index
            .indexed_files()
            .await?
            .into_iter()
            .filter(|path| !entries.contains_key(path))
            .collect();
        Ok(Self { entries, orphans })
    }

    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.file_path.clone(), e))
                .collect(),
            orphans: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `file` differs from what was last indexed under its path.
    #[must_use]
    pub fn is_current(&self, file: &SourceFile) -> bool {
        self.entries
            .get(&file.path)
            .is_some_and(|e| e.content_hash == file.content_hash)
    }

    /// Classify a walk against the manifest.
    ///
    /// Consumes `files` lazily so that unchanged file contents are dropped as
    /// soon as they are hashed. Paths known to the manifest (or holding
    /// orphaned chunks) that the walk did not produce are reported removed.
    #[must_use]
    pub fn diff(&self, files: impl IntoIterator<Item = SourceFile>) -> Delta {
        let mut delta = Delta::default();
        let mut seen = BTreeSet::new();

        for file in files {
            seen.insert(file.path.clone());
            match self.entries.get(&file.path) {
                Some(entry) if entry.content_hash == file.content_hash => delta.unchanged += 1,
                Some(_) => delta.changed.push(file),
                None => delta.added.push(file),
            }
        }

        let known: BTreeSet<&String> = self.entries.keys().chain(self.orphans.iter()).collect();
        delta.removed = known
            .into_iter()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        delta
    }
}
