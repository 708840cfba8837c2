//! Word-level tokenization shared by the hashing embedder, keyword scoring,
//! and the summarizer

use regex::Regex;
use std::sync::OnceLock;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "to", "of", "and", "in", "on", "for", "at", "from", "by", "with", "as",
    "is", "are", "was", "were", "be", "been", "being", "that", "this", "these", "those", "it",
    "its", "into", "over", "about", "than", "up", "down", "out", "off", "or", "not",
];

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("static regex"))
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercase alphanumeric words, stopwords included
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    word_regex()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Lowercase alphanumeric words with stopwords removed
pub fn tokenize(text: &str) -> Vec<String> {
    words(text).into_iter().filter(|w| !is_stopword(w)).collect()
}

/// Whole-word (or whole-phrase) containment, case-insensitive
pub fn contains_word(text: &str, word: &str) -> bool {
    let needle = words(word);
    if needle.is_empty() {
        return false;
    }
    let haystack = words(text);
    haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}
