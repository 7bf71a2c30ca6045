//! Splitting a complete text into stream-sized pieces.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// This many words per piece; whitespace stays with the preceding word.
    Words(usize),
    /// This many characters per piece.
    Chars(usize),
}

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\s*\S+\s*").expect("word pattern is valid"))
}

/// Split `text` so that concatenating the pieces reproduces it exactly.
pub fn split_chunks(text: &str, mode: ChunkMode) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    match mode {
        ChunkMode::Words(per_chunk) => {
            let words: Vec<&str> = word_pattern().find_iter(text).map(|m| m.as_str()).collect();
            if words.is_empty() {
                return vec![text.to_string()];
            }
            words
                .chunks(per_chunk.max(1))
                .map(|group| group.concat())
                .collect()
        }
        ChunkMode::Chars(per_chunk) => {
            let chars: Vec<char> = text.chars().collect();
            chars
                .chunks(per_chunk.max(1))
                .map(|group| group.iter().collect())
                .collect()
        }
    }
}
