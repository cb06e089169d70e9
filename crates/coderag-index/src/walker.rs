//! Source tree traversal and file loading.

use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};

use crate::error::{IndexError, Result};
use crate::languages::{Lang, detect_language};

/// Version-control metadata directories, never indexed.
pub const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;
const BINARY_SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerConfig {
    /// Gitignore-style globs excluded from the walk.
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
    pub include_hidden: bool,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            respect_gitignore: true,
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// Invalid sequences were replaced with U+FFFD.
    Utf8Lossy,
}

impl Encoding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf8Lossy => "utf-8-lossy",
        }
    }
}

/// Snapshot of one file taken during a walk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the walk root, `/`-separated.
    pub path: String,
    pub abs_path: PathBuf,
    pub content: String,
    /// BLAKE3 hex digest of the raw bytes.
    pub content_hash: String,
    /// Unix seconds.
    pub modified_at: i64,
    pub size: u64,
    pub encoding: Encoding,
    pub language: Option<Lang>,
}

#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
    overrides: Override,
}

impl Walker {
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if the root is missing, is not a
    /// directory, or an exclude glob is invalid.
    pub fn new(root: &Path, config: WalkerConfig) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            IndexError::Config(format!("source root {} is unreadable: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(IndexError::Config(format!(
                "source root {} is not a directory",
                root.display()
            )));
        }

        let mut builder = OverrideBuilder::new(&root);
        for glob in &config.exclude {
            builder
                .add(&format!("!{glob}"))
                .map_err(|e| IndexError::Config(format!("invalid exclude glob {glob:?}: {e}")))?;
        }
        let overrides = builder
            .build()
            .map_err(|e| IndexError::Config(format!("invalid exclude globs: {e}")))?;

        Ok(Self {
            root,
            config,
            overrides,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree, yielding loadable text files in path order.
    ///
    /// Unreadable, binary and oversized files are skipped.
    pub fn files(&self) -> impl Iterator<Item = SourceFile> + '_ {
        self.builder().build().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("walk error: {e}");
                    return None;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                return None;
            }
            match self.load(entry.path()) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(file = %entry.path().display(), "skipping unreadable file: {e}");
                    None
                }
            }
        })
    }

    /// Read a single file under the root.
    ///
    /// Returns `Ok(None)` for files the walk would skip: outside the root,
    /// excluded, binary or larger than `max_file_size`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if the file cannot be read.
    pub fn load(&self, abs_path: &Path) -> Result<Option<SourceFile>> {
        let Some(path) = self.relative_path(abs_path) else {
            return Ok(None);
        };
        if self.is_excluded(abs_path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(abs_path)?;
        if metadata.len() > self.config.max_file_size {
            tracing::debug!(file = %path, size = metadata.len(), "skipping oversized file");
            return Ok(None);
        }

        let bytes = std::fs::read(abs_path)?;
        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
        if sniff.contains(&0) {
            tracing::debug!(file = %path, "skipping binary file");
            return Ok(None);
        }

        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        let size = bytes.len() as u64;
        let (content, encoding) = match String::from_utf8(bytes) {
            Ok(text) => (text, Encoding::Utf8),
            Err(e) => (
                String::from_utf8_lossy(e.as_bytes()).into_owned(),
                Encoding::Utf8Lossy,
            ),
        };
        let modified_at = metadata
            .modified()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
            .unwrap_or_default();

        Ok(Some(SourceFile {
            language: detect_language(abs_path),
            path,
            abs_path: abs_path.to_path_buf(),
            content,
            content_hash,
            modified_at,
            size,
            encoding,
        }))
    }

    /// Root-relative `/`-separated path, or `None` if `abs_path` is outside the root.
    #[must_use]
    pub fn relative_path(&self, abs_path: &Path) -> Option<String> {
        let rel = abs_path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Whether `abs_path` falls under a VCS directory or an exclude glob.
    ///
    /// Gitignore and hidden-file rules are not consulted here.
    #[must_use]
    pub fn is_excluded(&self, abs_path: &Path) -> bool {
        let Ok(rel) = abs_path.strip_prefix(&self.root) else {
            return true;
        };
        if rel
            .components()
            .any(|c| matches!(c, Component::Normal(part) if VCS_DIRS.iter().any(|d| part == *d)))
        {
            return true;
        }
        // Check every ancestor so that a directory glob excludes its contents.
        let mut current = PathBuf::new();
        let components: Vec<_> = rel.components().collect();
        for (i, component) in components.iter().enumerate() {
            current.push(component);
            let is_dir = i + 1 < components.len();
            if self.overrides.matched(&current, is_dir).is_ignore() {
                return true;
            }
        }
        false
    }

    fn builder(&self) -> WalkBuilder {
        let respect = self.config.respect_gitignore;
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(!self.config.include_hidden)
            .git_ignore(respect)
            .git_global(respect)
            .git_exclude(respect)
            .ignore(respect)
            .parents(respect)
            .require_git(false)
            .follow_links(false)
            .overrides(self.overrides.clone())
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                !(entry.file_type().is_some_and(|ft| ft.is_dir())
                    && VCS_DIRS.iter().any(|d| entry.file_name() == *d))
            });
        builder
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(walker: &Walker) -> Vec<String> {
        walker.files().map(|f| f.path).collect()
    }

    #[test]
    fn missing_root_is_config_error() {
        let err = Walker::new(Path::new("/nonexistent/coderag/root"), WalkerConfig::default())
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn file_root_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"x = 1\n");
        let err = Walker::new(&dir.path().join("a.py"), WalkerConfig::default()).unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn walks_in_sorted_order_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/b.rs", b"fn b() {}\n");
        write(dir.path(), "src/a.rs", b"fn a() {}\n");
        write(dir.path(), "README.md", b"# readme\n");

        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        assert_eq!(paths(&walker), vec!["README.md", "src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn skips_vcs_binary_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".git/config", b"[core]\n");
        write(dir.path(), "image.bin", b"\x89PNG\0\0\0data");
        write(dir.path(), "big.txt", &vec![b'x'; 2048]);
        write(dir.path(), "small.txt", b"ok\n");

        let config = WalkerConfig {
            max_file_size: 1024,
            include_hidden: true,
            ..WalkerConfig::default()
        };
        let walker = Walker::new(dir.path(), config).unwrap();
        assert_eq!(paths(&walker), vec!["small.txt"]);
    }

    #[test]
    fn hidden_files_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".env", b"SECRET=1\n");
        write(dir.path(), "main.py", b"print(1)\n");

        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        assert_eq!(paths(&walker), vec!["main.py"]);

        let config = WalkerConfig {
            include_hidden: true,
            ..WalkerConfig::default()
        };
        let walker = Walker::new(dir.path(), config).unwrap();
        assert_eq!(paths(&walker), vec![".env", "main.py"]);
    }

    #[test]
    fn gitignore_respected_without_git_repo() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"target/\n*.log\n");
        write(dir.path(), "target/out.rs", b"fn gen() {}\n");
        write(dir.path(), "debug.log", b"trace\n");
        write(dir.path(), "lib.rs", b"fn lib() {}\n");

        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        assert_eq!(paths(&walker), vec!["lib.rs"]);

        let config = WalkerConfig {
            respect_gitignore: false,
            ..WalkerConfig::default()
        };
        let walker = Walker::new(dir.path(), config).unwrap();
        assert_eq!(paths(&walker), vec!["debug.log", "lib.rs", "target/out.rs"]);
    }

    #[test]
    fn exclude_globs_apply_to_walk_and_single_loads() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "node_modules/pkg/index.js", b"module.exports = 1;\n");
        write(dir.path(), "app.js", b"console.log(1);\n");
        write(dir.path(), "app.min.js", b"x\n");

        let config = WalkerConfig {
            exclude: vec!["node_modules".into(), "*.min.js".into()],
            ..WalkerConfig::default()
        };
        let walker = Walker::new(dir.path(), config).unwrap();
        assert_eq!(paths(&walker), vec!["app.js"]);

        let root = walker.root().to_path_buf();
        assert!(walker.is_excluded(&root.join("node_modules/pkg/index.js")));
        assert!(
            walker
                .load(&root.join("app.min.js"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn invalid_utf8_is_loaded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "latin1.txt", b"caf\xe9\n");

        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        let file = walker.files().next().unwrap();
        assert_eq!(file.encoding, Encoding::Utf8Lossy);
        assert!(file.content.contains('\u{FFFD}'));
        assert_eq!(file.size, 5);
    }

    #[test]
    fn content_hash_tracks_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"def foo(): pass\n");
        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();

        let first = walker.files().next().unwrap();
        assert_eq!(first.language, Some(Lang::Python));
        assert_eq!(
            first.content_hash,
            blake3::hash(b"def foo(): pass\n").to_hex().to_string()
        );

        write(dir.path(), "a.py", b"def foo(): return 1\n");
        let second = walker.files().next().unwrap();
        assert_ne!(first.content_hash, second.content_hash);
    }

    #[test]
    fn relative_path_outside_root_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        assert!(walker.relative_path(Path::new("/elsewhere/file.rs")).is_none());
        assert!(walker.relative_path(walker.root()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", b"x = 1\n");
        write(dir.path(), "secret.py", b"y = 2\n");
        let walker = Walker::new(dir.path(), WalkerConfig::default()).unwrap();
        let secret = walker.root().join("secret.py");
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&secret).is_ok() {
            // Mode bits do not bind this user, e.g. root.
            return;
        }

        assert_eq!(paths(&walker), vec!["a.py"]);
        assert!(matches!(walker.load(&secret), Err(IndexError::Io(_))));
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();
    }
}
