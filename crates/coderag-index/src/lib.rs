//! Source-tree indexing and semantic retrieval.
//!
//! The build side walks a tree, cuts files into overlapping chunks, embeds
//! them and stores the vectors in a `SQLite` index alongside a per-file
//! manifest, so later passes only touch files whose content changed. The
//! query side embeds a question and returns the closest chunks.

pub mod chunker;
pub(crate) mod context;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod manifest;
pub mod retriever;
pub mod store;
pub mod walker;
pub mod watcher;

pub use error::{IndexError, Result};
pub use indexer::{IndexReport, Indexer, IndexerConfig};
pub use retriever::{RetrievalConfig, RetrievalResult, Retriever, format_as_context};
pub use store::{IndexEntry, SearchHit, VectorIndex};
pub use walker::{SourceFile, Walker, WalkerConfig};
