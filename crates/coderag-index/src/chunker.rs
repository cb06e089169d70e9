//! Size-bounded, overlapping text chunking.
//!
//! Windows are measured in bytes and always end on a UTF-8 character
//! boundary. A window that stops before end-of-file is pulled back to just
//! after the last newline in its second half, so chunks tend to end on whole
//! lines without shrinking below half the target size.

use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::walker::SourceFile;

/// Roughly 512 tokens at four bytes per token.
const DEFAULT_TARGET_SIZE: usize = 2048;
/// Roughly 50 tokens.
const DEFAULT_OVERLAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum chunk size in bytes.
    pub target_size: usize,
    /// Bytes shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] unless `0 < overlap + 1 <= target_size`.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(IndexError::Config("chunk target_size must be > 0".into()));
        }
        if self.overlap >= self.target_size {
            return Err(IndexError::Config(format!(
                "chunk overlap ({}) must be smaller than target_size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub text: String,
    /// Byte offset of the first byte, inclusive.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// 1-based.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
    /// Position of the chunk within its file.
    pub index: usize,
    pub language: Option<Lang>,
    /// Bytes shared with the previous chunk.
    pub overlap: usize,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Stable chunk identifier derived from path and byte range.
#[must_use]
pub fn chunk_id(file_path: &str, start: usize, end: usize) -> String {
    blake3::hash(format!("{file_path}\0{start}\0{end}").as_bytes())
        .to_hex()
        .to_string()
}

/// Split a loaded file into chunks.
///
/// # Errors
///
/// Returns [`IndexError::Config`] if `config` is invalid.
pub fn chunk_file(file: &SourceFile, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    chunk_text(&file.path, &file.content, file.language, config)
}

/// Split `text` into chunks attributed to `file_path`.
///
/// Empty text yields no chunks; text no longer than `target_size` yields one.
///
/// # Errors
///
/// Returns [`IndexError::Config`] if `config` is invalid.
pub fn chunk_text(
    file_path: &str,
    text: &str,
    language: Option<Lang>,
    config: &ChunkerConfig,
) -> Result<Vec<Chunk>> {
    config.validate()?;
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let len = text.len();
    let mut chunks = Vec::with_capacity(len / config.target_size + 1);
    let mut start = 0;
    let mut prev_end: usize = 0;
    // Newlines before `start`, maintained incrementally.
    let mut line_at_start = 1;
    let mut counted_to = 0;

    loop {
        let mut end = snap_down(text, (start + config.target_size).min(len));
        if end <= start {
            end = snap_up(text, start + 1);
        }
        if end < len {
            let half = (end - start) / 2;
            if let Some(pos) = text[start..end].rfind('\n')
                && pos >= half
            {
                end = start + pos + 1;
            }
        }

        line_at_start += count_newlines(&text[counted_to..start]);
        counted_to = start;
        let body = &text[start..end];
        let line_end = line_at_start + count_newlines(body.strip_suffix('\n').unwrap_or(body));

        chunks.push(Chunk {
            id: chunk_id(file_path, start, end),
            file_path: file_path.to_owned(),
            text: body.to_owned(),
            start,
            end,
            line_start: line_at_start,
            line_end,
            index: chunks.len(),
            language,
            overlap: prev_end.saturating_sub(start),
        });

        if end >= len {
            break;
        }
        let mut next = snap_down(text, end.saturating_sub(config.overlap));
        if next <= start {
            next = end;
        }
        prev_end = end;
        start = next;
    }

    Ok(chunks)
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

fn snap_down(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn snap_up(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config(target_size: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            target_size,
            overlap,
        }
    }

    #[test]
    fn validate_rejects_bad_sizes() {
        assert!(config(0, 0).validate().is_err());
        assert!(config(100, 100).validate().is_err());
        assert!(config(100, 150).validate().is_err());
        assert!(config(100, 99).validate().is_ok());
        assert!(ChunkerConfig::default().validate().is_ok());
    }

    #[test]
    fn chunk_text_propagates_invalid_config() {
        let err = chunk_text("a.rs", "fn a() {}", None, &config(10, 10)).unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_text("empty.py", "", None, &ChunkerConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let text = "def foo():\n    return 1\n";
        let chunks = chunk_text("a.py", text, Some(Lang::Python), &ChunkerConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.text, text);
        assert_eq!((chunk.start, chunk.end), (0, text.len()));
        assert_eq!((chunk.line_start, chunk.line_end), (1, 2));
        assert_eq!(chunk.overlap, 0);
        assert_eq!(chunk.id, chunk_id("a.py", 0, text.len()));
    }

    #[test]
    fn breaks_after_newline_in_second_half() {
        let text = "line one\nline two\nline three\nline four\n";
        let chunks = chunk_text("f.txt", text, None, &config(24, 4)).unwrap();
        assert_eq!(chunks[0].text, "line one\nline two\n");
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 2));
        assert_eq!(chunks[1].start, 18 - 4);
        assert_eq!(chunks[1].overlap, 4);
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "x".repeat(100);
        let chunks = chunk_text("x.txt", &text, None, &config(40, 10)).unwrap();
        let ranges: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(ranges, vec![(0, 40), (30, 70), (60, 100)]);
        assert_eq!(chunks[2].index, 2);
    }

    #[test]
    fn never_splits_multibyte_characters() {
        let text = "é".repeat(50);
        let chunks = chunk_text("u.txt", &text, None, &config(7, 2)).unwrap();
        for chunk in &chunks {
            assert!(chunk.len() <= 7);
            assert!(chunk.text.chars().all(|c| c == 'é'));
        }
        assert_eq!(chunks.last().unwrap().end, text.len());
    }

    #[test]
    fn target_smaller_than_a_character_still_advances() {
        let text = "日本語";
        let chunks = chunk_text("j.txt", text, None, &config(1, 0)).unwrap();
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["日", "本", "語"]);
    }

    #[test]
    fn line_numbers_follow_offsets() {
        let text: String = (1..=40).map(|i| format!("line {i:02}\n")).collect();
        let chunks = chunk_text("l.txt", &text, None, &config(64, 8)).unwrap();
        for chunk in &chunks {
            let expected_start = text[..chunk.start].matches('\n').count() + 1;
            assert_eq!(chunk.line_start, expected_start);
            assert!(chunk.line_end >= chunk.line_start);
        }
        assert_eq!(chunks.last().unwrap().line_end, 40);
    }

    #[test]
    fn chunk_ids_differ_by_path_and_range() {
        assert_ne!(chunk_id("a.py", 0, 10), chunk_id("b.py", 0, 10));
        assert_ne!(chunk_id("a.py", 0, 10), chunk_id("a.py", 0, 11));
        assert_eq!(chunk_id("a.py", 0, 10), chunk_id("a.py", 0, 10));
    }

    proptest! {
        #[test]
        fn chunks_cover_text_and_advance(
            text in "[a-z é\n日]{0,600}",
            target_size in 1usize..128,
            overlap_ratio in 0.0f64..1.0,
        ) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let overlap = ((target_size - 1) as f64 * overlap_ratio) as usize;
            let cfg = config(target_size, overlap);
            let chunks = chunk_text("p.txt", &text, None, &cfg).unwrap();

            if text.is_empty() {
                prop_assert!(chunks.is_empty());
            } else {
                prop_assert_eq!(chunks[0].start, 0);
                prop_assert_eq!(chunks.last().unwrap().end, text.len());
            }
            for chunk in &chunks {
                prop_assert_eq!(&chunk.text, &text[chunk.start..chunk.end]);
                prop_assert!(!chunk.is_empty());
                // A single character wider than the target is the only overflow.
                prop_assert!(chunk.len() <= target_size.max(4));
            }
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].start > pair[0].start);
                prop_assert!(pair[1].start <= pair[0].end);
            }
        }

        #[test]
        fn chunking_is_deterministic(text in "[a-z\n]{0,400}", target_size in 2usize..64) {
            let cfg = config(target_size, target_size / 3);
            let first = chunk_text("d.txt", &text, None, &cfg).unwrap();
            let second = chunk_text("d.txt", &text, None, &cfg).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
