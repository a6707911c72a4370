//! Word-window text chunker.
//!
//! Splits note content into [`Chunk`]s of at most `chunk_size` words, where
//! a word is a maximal run of non-whitespace characters. Chunks are slices
//! of the original text, so line breaks and indentation inside a chunk are
//! preserved and no chunk ever ends mid-word.
//!
//! # Example
//!
//! ```rust
//! use vault_context_core::chunk::chunk_words;
//!
//! let chunks = chunk_words("one two three\nfour five", 2);
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[1].text, "three\nfour");
//! assert_eq!(chunks[2].tokens, 1);
//! ```

use sha2::{Digest, Sha256};

/// A contiguous run of words from a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based, contiguous.
    pub index: usize,
    pub text: String,
    /// Number of words in `text`.
    pub tokens: usize,
}

/// Approximate token count: whitespace-delimited words.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split `text` into chunks of at most `chunk_size` words.
///
/// Returns no chunks for blank text or a zero `chunk_size`.
pub fn chunk_words(text: &str, chunk_size: usize) -> Vec<Chunk> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let spans = word_spans(text);
    spans
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, words)| {
            let start = words[0].0;
            let end = words[words.len() - 1].1;
            Chunk {
                index,
                text: text[start..end].to_string(),
                tokens: words.len(),
            }
        })
        .collect()
}

/// Byte ranges of every word in `text`. Boundaries always fall on char boundaries.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Hex SHA-256 of `text`, used to detect exact duplicates.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
