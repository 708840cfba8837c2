//! Best-effort article summarization
//!
//! Summaries never fail a request. Without usable backend output the caller
//! gets the opening of the text instead.

use crate::config::SummarizerConfig;
use crate::corpus::normalize_text;
use crate::corpus::text::tokenize;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

const ELLIPSIS: char = '…';

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("Summarization failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    Extractive,
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub text: String,
    pub method: SummaryMethod,
}

/// A summarization capability
pub trait SummaryBackend: Send + Sync {
    /// Summary of `text` in at most `max_length` characters
    fn summarize(&self, text: &str, max_length: usize) -> Result<String, SummaryError>;
}

/// Picks the sentences that best cover the document's frequent terms
pub struct ExtractiveBackend {
    max_sentences: usize,
}

impl ExtractiveBackend {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl SummaryBackend for ExtractiveBackend {
    fn summarize(&self, text: &str, max_length: usize) -> Result<String, SummaryError> {
        let sentences: Vec<&str> = split_sentences(text)
            .into_iter()
            .map(str::trim)
            .filter(|s| !tokenize(s).is_empty())
            .collect();
        if sentences.is_empty() {
            return Err(SummaryError::Failed("no sentences to extract".to_string()));
        }

        let mut picked = rank_sentences(&sentences, self.max_sentences);
        // Keep document order
        picked.sort_unstable();

        let mut summary = String::new();
        for idx in picked {
            let sentence = sentences[idx];
            let joined = if summary.is_empty() {
                sentence.to_string()
            } else {
                format!("{} {}", summary, sentence)
            };
            if joined.chars().count() > max_length {
                break;
            }
            summary = joined;
        }

        Ok(summary)
    }
}

pub struct Summarizer {
    backend: Option<Box<dyn SummaryBackend>>,
    default_max_length: usize,
}

impl Summarizer {
    pub fn new(backend: Option<Box<dyn SummaryBackend>>, default_max_length: usize) -> Self {
        Self {
            backend,
            default_max_length,
        }
    }

    pub fn from_config(config: &SummarizerConfig) -> Self {
        let backend: Option<Box<dyn SummaryBackend>> = if config.enabled {
            Some(Box::new(ExtractiveBackend::new(config.max_sentences)))
        } else {
            None
        };
        Self::new(backend, config.max_length)
    }

    pub fn default_max_length(&self) -> usize {
        self.default_max_length
    }

    /// Summary of `text` in at most `max_length` characters
    pub fn summarize(&self, text: &str, max_length: usize) -> Summary {
        let text = normalize_text(text);
        if text.is_empty() || max_length == 0 {
            return Summary {
                text: String::new(),
                method: SummaryMethod::Truncated,
            };
        }

        if let Some(backend) = &self.backend {
            match backend.summarize(&text, max_length) {
                Ok(summary) => {
                    let summary = summary.trim();
                    if !summary.is_empty() && summary.chars().count() <= max_length {
                        return Summary {
                            text: summary.to_string(),
                            method: SummaryMethod::Extractive,
                        };
                    }
                    debug!("Summarizer produced no usable output; truncating");
                }
                Err(e) => warn!("Summarizer failed: {}; truncating", e),
            }
        }

        Summary {
            text: truncate(&text, max_length),
            method: SummaryMethod::Truncated,
        }
    }
}

/// The first `max_length` characters, cut at a word boundary, with `…` when shortened
pub fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    if max_length == 0 {
        return String::new();
    }

    // Leave room for the ellipsis
    let budget = max_length - 1;
    let head: String = text.chars().take(budget).collect();
    let next_is_break = text.chars().nth(budget).is_some_and(char::is_whitespace);
    let cut = if next_is_break {
        head.trim_end()
    } else {
        match head.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => head[..pos].trim_end(),
            _ => head.as_str(),
        }
    };
    format!("{}{}", cut, ELLIPSIS)
}

/// Split on `.` `!` `?` followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
            result.push(&text[start..i + c.len_utf8()]);
            start = i + c.len_utf8();
        }
    }
    if start < text.len() {
        result.push(&text[start..]);
    }
    result
}

/// Indices of the `top_k` sentences with the highest length-normalized term frequency
fn rank_sentences(sentences: &[&str], top_k: usize) -> Vec<usize> {
    let tokenized: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s)).collect();

    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        for token in tokens {
            *frequency.entry(token.as_str()).or_insert(0) += 1;
        }
    }

    let mut scored: Vec<(f64, usize)> = tokenized
        .iter()
        .enumerate()
        .map(|(idx, tokens)| {
            let total: usize = tokens.iter().map(|t| frequency[t.as_str()]).sum();
            (total as f64 / tokens.len().max(1) as f64, idx)
        })
        .collect();

    // Lead sentences win ties
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().take(top_k).map(|(_, idx)| idx).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingBackend;

    impl SummaryBackend for FailingBackend {
        fn summarize(&self, _text: &str, _max_length: usize) -> Result<String, SummaryError> {
            Err(SummaryError::Unavailable("model not loaded".to_string()))
        }
    }

    const TEXT: &str = "NASA confirmed the Artemis II crew. The crew will fly around the Moon. \
                        Weather was mild. The Artemis II crew trains in Houston for the Moon flight.";

    #[test]
    fn test_extractive_keeps_document_order() {
        let summarizer = Summarizer::new(Some(Box::new(ExtractiveBackend::new(2))), 400);
        let summary = summarizer.summarize(TEXT, 400);

        assert_eq!(summary.method, SummaryMethod::Extractive);
        assert_eq!(
            summary.text,
            "NASA confirmed the Artemis II crew. \
             The Artemis II crew trains in Houston for the Moon flight."
        );
    }

    #[test]
    fn test_fallback_when_backend_fails() {
        let summarizer = Summarizer::new(Some(Box::new(FailingBackend)), 400);
        let summary = summarizer.summarize(TEXT, 30);
        assert_eq!(summary.method, SummaryMethod::Truncated);
        assert!(summary.text.chars().count() <= 30);
        assert!(summary.text.ends_with(ELLIPSIS));
    }

    #[test]
    fn test_disabled_backend_truncates() {
        let summarizer = Summarizer::new(None, 400);
        let summary = summarizer.summarize("Short text.", 400);
        assert_eq!(summary.method, SummaryMethod::Truncated);
        assert_eq!(summary.text, "Short text.");
    }

    #[test]
    fn test_empty_text_gives_empty_summary() {
        let summarizer = Summarizer::from_config(&SummarizerConfig {
            enabled: true,
            max_length: 400,
            max_sentences: 3,
        });
        assert_eq!(summarizer.summarize("  \n ", 100).text, "");
    }

    #[test]
    fn test_truncate_at_word_boundary() {
        assert_eq!(truncate("rocket launch today", 100), "rocket launch today");
        assert_eq!(truncate("rocket launch today", 15), "rocket launch…");
        assert_eq!(truncate("rocket launch today", 14), "rocket launch…");
        assert_eq!(truncate("supercalifragilistic", 6), "super…");
        assert_eq!(truncate("Ünïcode wörds here", 9), "Ünïcode…");
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One. Two! Three? v1.5 works"),
            vec!["One.", " Two!", " Three?", " v1.5 works"]
        );
    }
}
