//! Embedding text generation.
//!
//! Prefixing the chunk with its path and language lets conceptual queries
//! ("where is the config parsed?") match on file names as well as code.

use crate::chunker::Chunk;

/// Text sent to the embedding backend for `chunk` (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 64);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    if let Some(lang) = chunk.language {
        text.push_str("# Language: ");
        text.push_str(lang.id());
        text.push('\n');
    }

    text.push_str(&chunk.text);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_text};
    use crate::languages::Lang;

    #[test]
    fn includes_path_language_and_text() {
        let chunks = chunk_text(
            "src/lib.rs",
            "fn hello() { 42 }",
            Some(Lang::Rust),
            &ChunkerConfig::default(),
        )
        .unwrap();
        let text = contextualize_for_embedding(&chunks[0]);
        assert_eq!(text, "# src/lib.rs\n# Language: rust\nfn hello() { 42 }");
    }

    #[test]
    fn omits_language_line_when_unknown() {
        let chunks =
            chunk_text("Makefile", "all:\n\tcc x.c\n", None, &ChunkerConfig::default()).unwrap();
        let text = contextualize_for_embedding(&chunks[0]);
        assert!(text.starts_with("# Makefile\nall:"));
        assert!(!text.contains("Language"));
    }
}
