//! Article schema and text preparation
//!
//! Collector records arrive as loosely-typed JSON. They are validated once,
//! at the ingestion boundary, into an [`Article`]; everything downstream can
//! rely on the required fields being present.

mod loader;
pub mod text;

pub use loader::{dedupe_by_url, latest_jsonl, load_jsonl, LoadedCorpus};

use crate::error::{AstroError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated news article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Unique, stable identifier
    pub id: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub source_url: String,
    /// Publisher name, when the collector recorded one
    #[serde(default)]
    pub source: Option<String>,
}

/// Article record as emitted by the collector, before validation
///
/// Accepts the collector's field names (`summary`, `url`) as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawArticle {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "summary")]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default, alias = "url")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl RawArticle {
    /// Identifier to report when the record is rejected
    pub fn display_id(&self) -> String {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("<missing id>")
            .to_string()
    }
}

impl TryFrom<RawArticle> for Article {
    type Error = AstroError;

    fn try_from(raw: RawArticle) -> Result<Self> {
        let id = required(raw.id, "id").map_err(AstroError::Input)?;
        let reject = |e: String| AstroError::input(format!("article {}: {}", id, e));

        let title = required(raw.title, "title").map_err(reject)?;
        let source_url = required(raw.source_url, "source_url").map_err(reject)?;
        let published_raw = required(raw.published_at, "published_at").map_err(reject)?;
        let published_at = parse_timestamp(&published_raw).ok_or_else(|| {
            AstroError::input(format!(
                "article {}: unparseable published_at '{}'",
                id, published_raw
            ))
        })?;

        Ok(Article {
            id,
            title,
            body: raw.body.unwrap_or_default().trim().to_string(),
            published_at,
            source_url,
            source: raw
                .source
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field '{}'", field))
}

/// Parse RFC 3339 timestamps, tolerating a trailing `Z` or a bare date
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl Article {
    /// Text that is embedded for this article: title, blank line, body
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body).trim().to_string()
    }

    /// BLAKE3 hash of the normalized embedding text
    pub fn content_hash(&self) -> String {
        content_hash(&normalize_text(&self.embedding_text()))
    }
}

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn content_hash(normalized: &str) -> String {
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}
