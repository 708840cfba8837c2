//! JSONL corpus loading

use super::RawArticle;
use crate::error::{AstroError, Result};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Records parsed from a JSONL file, plus the lines that failed to parse
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub records: Vec<RawArticle>,
    /// (line number, parse error)
    pub rejected: Vec<(usize, String)>,
}

/// Load collector records from a JSON-lines file
///
/// Blank lines are skipped. A line that is not valid JSON is reported in
/// `rejected` instead of failing the whole file.
pub fn load_jsonl(path: &Path) -> Result<LoadedCorpus> {
    let file = std::fs::File::open(path).map_err(|e| AstroError::Io {
        source: e,
        context: format!("Failed to open corpus file: {}", path.display()),
    })?;

    let mut corpus = LoadedCorpus::default();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AstroError::Io {
            source: e,
            context: format!("Failed to read corpus file: {}", path.display()),
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawArticle>(line) {
            Ok(record) => corpus.records.push(record),
            Err(e) => {
                tracing::warn!("Skipping malformed line {} in {}: {}", idx + 1, path.display(), e);
                corpus.rejected.push((idx + 1, e.to_string()));
            }
        }
    }

    tracing::debug!(
        "Loaded {} records from {} ({} rejected)",
        corpus.records.len(),
        path.display(),
        corpus.rejected.len()
    );
    Ok(corpus)
}

/// Newest `*.jsonl` file in a directory
///
/// Collector output is date-tagged (`YYYYMMDD.jsonl`), so the lexicographically
/// greatest name is the most recent.
pub fn latest_jsonl(dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(|e| AstroError::Io {
        source: e,
        context: format!("Failed to read corpus directory: {}", dir.display()),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    files
        .pop()
        .ok_or_else(|| AstroError::input(format!("No JSONL files found in {}", dir.display())))
}

/// Keep the last record per source URL, preserving first-seen order
///
/// Records without a URL are kept as-is; validation rejects them later.
pub fn dedupe_by_url(records: Vec<RawArticle>) -> Vec<RawArticle> {
    let mut positions: ahash::AHashMap<String, usize> = ahash::AHashMap::new();
    let mut out: Vec<RawArticle> = Vec::with_capacity(records.len());

    for record in records {
        match record.source_url.clone() {
            Some(url) => match positions.get(&url) {
                Some(&pos) => out[pos] = record,
                None => {
                    positions.insert(url, out.len());
                    out.push(record);
                }
            },
            None => out.push(record),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_jsonl_skips_blank_and_reports_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("20240101.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"id":"a","title":"A"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file, r#"{{"id":"b","title":"B"}}"#).unwrap();

        let corpus = load_jsonl(&path).unwrap();
        assert_eq!(corpus.records.len(), 2);
        assert_eq!(corpus.rejected.len(), 1);
        assert_eq!(corpus.rejected[0].0, 3);
    }

    #[test]
    fn test_load_jsonl_optional_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("20240102.jsonl");
        std::fs::write(
            &path,
            [
                r#"{"id":"a","title":"A","published_at":"2024-01-02","url":"https://a","source":"ESA"}"#,
                r#"{"id":"b","title":"B","published_at":"2024-01-02","url":"https://b"}"#,
            ]
            .join("\n"),
        )
        .unwrap();

        let corpus = load_jsonl(&path).unwrap();
        assert!(corpus.rejected.is_empty());
        assert_eq!(corpus.records[0].source.as_deref(), Some("ESA"));
        assert_eq!(corpus.records[1].source, None);

        let articles: Vec<super::super::Article> = corpus
            .records
            .into_iter()
            .map(|r| r.try_into().unwrap())
            .collect();
        assert_eq!(articles[0].source.as_deref(), Some("ESA"));
        assert_eq!(articles[1].source, None);
    }

    #[test]
    fn test_latest_jsonl() {
        let temp = TempDir::new().unwrap();
        for name in ["20240101.jsonl", "20240315.jsonl", "notes.txt"] {
            std::fs::write(temp.path().join(name), "").unwrap();
        }
        let latest = latest_jsonl(temp.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "20240315.jsonl");
    }

    #[test]
    fn test_latest_jsonl_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(latest_jsonl(temp.path()).is_err());
    }

    #[test]
    fn test_dedupe_keeps_last_per_url() {
        let record = |id: &str, url: &str| RawArticle {
            id: Some(id.to_string()),
            source_url: Some(url.to_string()),
            ..Default::default()
        };
        let records = vec![
            record("1", "https://a"),
            record("2", "https://b"),
            record("3", "https://a"),
        ];

        let deduped = dedupe_by_url(records);
        let ids: Vec<_> = deduped.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }
}
