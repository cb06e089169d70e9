//! `SQLite`-backed vector index: chunk rows with little-endian `f32` vector
//! blobs, the index manifest, and brute-force cosine search.

use std::str::FromStr;

use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::error::{IndexError, Result};
use crate::manifest::ManifestEntry;

const DIMENSIONS_KEY: &str = "dimensions";

/// Persisted unit of the index: one chunk with its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Insertion sequence, assigned by the store. Ignored on write.
    pub seq: i64,
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub line_start: usize,
    pub line_end: usize,
    pub language: Option<String>,
    pub content: String,
    /// Content hash of the file the chunk was cut from.
    pub file_hash: String,
    pub vector: Vec<f32>,
    /// Unix seconds.
    pub indexed_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: IndexEntry,
    pub score: f32,
}

#[derive(FromRow)]
struct ChunkRow {
    seq: i64,
    chunk_id: String,
    file_path: String,
    chunk_index: i64,
    start_offset: i64,
    end_offset: i64,
    line_start: i64,
    line_end: i64,
    language: Option<String>,
    content: String,
    file_hash: String,
    vector: Vec<u8>,
    indexed_at: i64,
}

impl TryFrom<ChunkRow> for IndexEntry {
    type Error = IndexError;

    fn try_from(row: ChunkRow) -> Result<Self> {
        Ok(Self {
            seq: row.seq,
            chunk_id: row.chunk_id,
            file_path: row.file_path,
            chunk_index: usize::try_from(row.chunk_index)?,
            start_offset: usize::try_from(row.start_offset)?,
            end_offset: usize::try_from(row.end_offset)?,
            line_start: usize::try_from(row.line_start)?,
            line_end: usize::try_from(row.line_end)?,
            language: row.language,
            content: row.content,
            file_hash: row.file_hash,
            vector: blob_to_vec(&row.vector),
            indexed_at: row.indexed_at,
        })
    }
}

#[derive(FromRow)]
struct ManifestRow {
    file_path: String,
    content_hash: String,
    chunk_count: i64,
    size: i64,
    modified_at: i64,
    indexed_at: i64,
}

impl TryFrom<ManifestRow> for ManifestEntry {
    type Error = IndexError;

    fn try_from(row: ManifestRow) -> Result<Self> {
        Ok(Self {
            file_path: row.file_path,
            content_hash: row.content_hash,
            chunk_count: usize::try_from(row.chunk_count)?,
            size: u64::try_from(row.size)?,
            modified_at: row.modified_at,
            indexed_at: row.indexed_at,
        })
    }
}

const SELECT_CHUNK: &str = "SELECT seq, chunk_id, file_path, chunk_index, start_offset, end_offset, \
     line_start, line_end, language, content, file_hash, vector, indexed_at FROM chunks";

/// Handle to the persisted index. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

impl VectorIndex {
    /// Open (or create) the index database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        if path == ":memory:" {
            return Self::in_memory().await;
        }
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{path}?mode=rwc"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Self::from_pool(pool).await
    }

    /// In-memory index, used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to `:memory:` is a separate database, so the pool
        // must hold exactly one connection for its whole lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Vector length fixed by the first stored vector, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn dimensions(&self) -> Result<Option<usize>> {
        let value: Option<(String,)> = sqlx::query_as("SELECT value FROM index_meta WHERE key = ?")
            .bind(DIMENSIONS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.and_then(|(v,)| v.parse().ok()))
    }

    /// Insert or replace a single entry by chunk id.
    ///
    /// Replacing keeps the original insertion sequence.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if the vector length differs
    /// from the index dimension, or a database error.
    pub async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        ensure_dimensions(&mut tx, entry.vector.len()).await?;
        insert_entry(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every entry cut from `file_path`. The manifest is not touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected())?)
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if no entry has this id.
    pub async fn get(&self, chunk_id: &str) -> Result<IndexEntry> {
        let row: Option<ChunkRow> = sqlx::query_as(&format!("{SELECT_CHUNK} WHERE chunk_id = ?"))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| IndexError::NotFound(format!("chunk {chunk_id}")))?
            .try_into()
    }

    /// All entries of one file, in chunk order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn entries_for_file(&self, file_path: &str) -> Result<Vec<IndexEntry>> {
        let rows: Vec<ChunkRow> = sqlx::query_as(&format!(
            "{SELECT_CHUNK} WHERE file_path = ? ORDER BY chunk_index"
        ))
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(IndexEntry::try_from).collect()
    }

    /// Top `k` entries by cosine similarity to `query`.
    ///
    /// Results are ordered by descending score; equal scores keep insertion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if `query` has the wrong
    /// length, or a database error.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimensions().await?
            && expected != query.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let window = k.saturating_mul(2);
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut rows = sqlx::query_as::<_, ChunkRow>(SELECT_CHUNK).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let entry = IndexEntry::try_from(row)?;
            let score = cosine_similarity(query, &entry.vector);
            hits.push(SearchHit { entry, score });
            if hits.len() >= window {
                rank(&mut hits);
                hits.truncate(k);
            }
        }
        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Atomically replace all entries of `file_path` and its manifest row.
    ///
    /// An empty `entries` slice records the file with zero chunks.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if any vector has the wrong
    /// length; nothing is written in that case.
    pub async fn replace_file(
        &self,
        file_path: &str,
        entries: &[IndexEntry],
        manifest: &ManifestEntry,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(first) = entries.first() {
            let len = first.vector.len();
            ensure_dimensions(&mut tx, len).await?;
            if let Some(bad) = entries.iter().find(|e| e.vector.len() != len) {
                return Err(IndexError::DimensionMismatch {
                    expected: len,
                    actual: bad.vector.len(),
                });
            }
        }

        sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            insert_entry(&mut tx, entry).await?;
        }
        sqlx::query(
            "INSERT INTO manifest (file_path, content_hash, chunk_count, size, modified_at, indexed_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(file_path) DO UPDATE SET content_hash = excluded.content_hash, \
             chunk_count = excluded.chunk_count, size = excluded.size, \
             modified_at = excluded.modified_at, indexed_at = excluded.indexed_at",
        )
        .bind(&manifest.file_path)
        .bind(&manifest.content_hash)
        .bind(i64::try_from(manifest.chunk_count)?)
        .bind(i64::try_from(manifest.size)?)
        .bind(manifest.modified_at)
        .bind(manifest.indexed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Atomically drop a file's entries and manifest row.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn remove_file(&self, file_path: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM manifest WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(usize::try_from(removed)?)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn entry_count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count)?)
    }

    /// Files recorded in the manifest, including files without entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn file_count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM manifest")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count)?)
    }

    /// Distinct file paths that currently hold entries, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn indexed_files(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn manifest_entries(&self) -> Result<Vec<ManifestEntry>> {
        let rows: Vec<ManifestRow> = sqlx::query_as(
            "SELECT file_path, content_hash, chunk_count, size, modified_at, indexed_at \
             FROM manifest ORDER BY file_path",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ManifestEntry::try_from).collect()
    }

    /// Drop every entry, the manifest and the recorded dimension.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["chunks", "manifest", "index_meta"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("index cleared");
        Ok(())
    }
}

async fn ensure_dimensions(tx: &mut Transaction<'_, Sqlite>, len: usize) -> Result<()> {
    let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM index_meta WHERE key = ?")
        .bind(DIMENSIONS_KEY)
        .fetch_optional(&mut **tx)
        .await?;
    match stored.and_then(|(v,)| v.parse::<usize>().ok()) {
        Some(expected) if expected != len => Err(IndexError::DimensionMismatch {
            expected,
            actual: len,
        }),
        Some(_) => Ok(()),
        None => {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(DIMENSIONS_KEY)
                .bind(len.to_string())
                .execute(&mut **tx)
                .await?;
            Ok(())
        }
    }
}

async fn insert_entry(tx: &mut Transaction<'_, Sqlite>, entry: &IndexEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO chunks (chunk_id, file_path, chunk_index, start_offset, end_offset, \
         line_start, line_end, language, content, file_hash, vector, indexed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(chunk_id) DO UPDATE SET file_path = excluded.file_path, \
         chunk_index = excluded.chunk_index, start_offset = excluded.start_offset, \
         end_offset = excluded.end_offset, line_start = excluded.line_start, \
         line_end = excluded.line_end, language = excluded.language, \
         content = excluded.content, file_hash = excluded.file_hash, \
         vector = excluded.vector, indexed_at = excluded.indexed_at",
    )
    .bind(&entry.chunk_id)
    .bind(&entry.file_path)
    .bind(i64::try_from(entry.chunk_index)?)
    .bind(i64::try_from(entry.start_offset)?)
    .bind(i64::try_from(entry.end_offset)?)
    .bind(i64::try_from(entry.line_start)?)
    .bind(i64::try_from(entry.line_end)?)
    .bind(&entry.language)
    .bind(&entry.content)
    .bind(&entry.file_hash)
    .bind(vec_to_blob(&entry.vector))
    .bind(entry.indexed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.seq.cmp(&b.entry.seq))
    });
}

#[must_use]
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[must_use]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; zero when either vector has zero norm or lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
