//! Ingestion: articles in, embeddings out
//!
//! The indexer is the only writer of vectors. It skips articles whose stored
//! embedding already matches their content and the active model, embeds the
//! rest in bounded batches, and isolates per-article failures so one bad
//! record never aborts a run.

mod locks;

pub use locks::{KeyGuard, KeyLocks};

use crate::corpus::{Article, LoadedCorpus, RawArticle};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::{ArticleStore, VectorRecord, VectorStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Articles embedded for the first time
    pub inserted: usize,
    /// Existing articles re-embedded because their content or model changed
    pub updated: usize,
    /// Articles whose stored embedding was already current, plus superseded duplicates
    pub skipped: usize,
    pub failed: Vec<IngestFailure>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub article_id: String,
    pub reason: String,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    fn fail(&mut self, article_id: impl Into<String>, reason: impl ToString) {
        self.failed.push(IngestFailure {
            article_id: article_id.into(),
            reason: reason.to_string(),
        });
    }
}

/// An article that needs embedding
struct Pending {
    article: Article,
    content_hash: String,
    existed: bool,
}

pub struct Indexer {
    embedder: Arc<Embedder>,
    articles: Arc<ArticleStore>,
    vectors: Arc<VectorStore>,
    locks: KeyLocks,
}

impl Indexer {
    pub fn new(
        embedder: Arc<Embedder>,
        articles: Arc<ArticleStore>,
        vectors: Arc<VectorStore>,
    ) -> Self {
        Self {
            embedder,
            articles,
            vectors,
            locks: KeyLocks::new(),
        }
    }

    /// Embed and store `articles`
    ///
    /// Per-article embedding failures land in [`IngestReport::failed`];
    /// store failures abort the run.
    pub fn ingest(&self, articles: Vec<Article>) -> Result<IngestReport> {
        let start = Instant::now();
        let mut report = IngestReport::default();

        // Last occurrence of an id wins
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<Article> = Vec::with_capacity(articles.len());
        for article in articles {
            match positions.get(&article.id) {
                Some(&pos) => {
                    unique[pos] = article;
                    report.skipped += 1;
                }
                None => {
                    positions.insert(article.id.clone(), unique.len());
                    unique.push(article);
                }
            }
        }
        if unique.is_empty() {
            return Ok(report);
        }

        let ids: Vec<String> = unique.iter().map(|a| a.id.clone()).collect();
        let _guard = self.locks.acquire(&ids);

        let model_version = self.embedder.model_version().to_string();
        let fingerprints = self.vectors.fingerprints(&ids)?;

        let mut pending = Vec::new();
        let mut current = Vec::new();
        let mut redated = Vec::new();
        for article in unique {
            let content_hash = article.content_hash();
            match fingerprints.get(&article.id) {
                Some(fp) if fp.model_version == model_version && fp.content_hash == content_hash => {
                    let published_at = article.published_at.timestamp();
                    if fp.published_at != published_at {
                        redated.push((article.id.clone(), published_at));
                    }
                    current.push(article);
                }
                existing => pending.push(Pending {
                    existed: existing.is_some(),
                    article,
                    content_hash,
                }),
            }
        }

        // Metadata-only edits (url, date) skip embedding but still reach the
        // article row, and a new date reaches the index tie-break
        self.vectors.set_published_at(&redated)?;
        for article in &current {
            self.articles.upsert(article)?;
        }
        report.skipped += current.len();

        debug!(
            "Ingest: {} to embed, {} skipped",
            pending.len(),
            report.skipped
        );

        for chunk in pending.chunks(self.embedder.batch_size()) {
            let embedded = self.embed_chunk(chunk, &mut report);

            let mut records = Vec::with_capacity(embedded.len());
            let mut written = Vec::with_capacity(embedded.len());
            for (item, vector) in embedded {
                records.push(VectorRecord {
                    article_id: item.article.id.clone(),
                    vector,
                    model_version: model_version.clone(),
                    content_hash: item.content_hash.clone(),
                    published_at: item.article.published_at.timestamp(),
                });
                written.push(item);
            }

            // Vectors first: a rejected batch leaves no orphan article rows
            self.vectors.bulk_upsert(records)?;
            for item in written {
                self.articles.upsert(&item.article)?;
                if item.existed {
                    report.updated += 1;
                } else {
                    report.inserted += 1;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Ingested {} new, {} updated, {} skipped, {} failed in {}ms",
            report.inserted,
            report.updated,
            report.skipped,
            report.failed.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Validate collector records, then ingest the valid ones
    pub fn ingest_raw(&self, records: Vec<RawArticle>) -> Result<IngestReport> {
        let mut rejected = IngestReport::default();
        let mut valid = Vec::with_capacity(records.len());

        for record in records {
            let id = record.display_id();
            match Article::try_from(record) {
                Ok(article) => valid.push(article),
                Err(e) => {
                    warn!("Rejected article {}: {}", id, e);
                    rejected.fail(id, e);
                }
            }
        }

        let mut report = self.ingest(valid)?;
        report.merge(rejected);
        Ok(report)
    }

    /// Ingest a loaded JSONL file; unparseable lines are reported by line number
    pub fn ingest_corpus(&self, corpus: LoadedCorpus) -> Result<IngestReport> {
        let mut report = self.ingest_raw(corpus.records)?;
        for (line, reason) in corpus.rejected {
            report.fail(format!("line {}", line), reason);
        }
        Ok(report)
    }

    /// Re-embed every article whose vector came from another model version
    ///
    /// Eager migration: after it returns the whole corpus is queryable under
    /// the active model. Costs one embedding per stale article.
    pub fn migrate(&self) -> Result<IngestReport> {
        let stale = self
            .vectors
            .ids_not_in_version(self.embedder.model_version())?;
        if stale.is_empty() {
            debug!("Migration: nothing to re-embed");
            return Ok(IngestReport::default());
        }

        info!(
            "Migrating {} articles to {}",
            stale.len(),
            self.embedder.model_version()
        );
        let articles = self.articles.get_many(&stale)?;
        let mut report = IngestReport::default();
        if articles.len() < stale.len() {
            let found: std::collections::HashSet<&str> =
                articles.iter().map(|a| a.id.as_str()).collect();
            for id in stale.iter().filter(|id| !found.contains(id.as_str())) {
                report.fail(id.clone(), "article text missing; cannot re-embed");
            }
        }

        let migrated = self.ingest(articles)?;
        report.merge(migrated);
        Ok(report)
    }

    /// Remove an article's embedding; `false` when it was not indexed
    pub fn delete(&self, article_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire([article_id]);
        self.vectors.delete(article_id)
    }

    /// Embed a chunk, falling back to one-by-one to isolate failures
    fn embed_chunk<'a>(
        &self,
        chunk: &'a [Pending],
        report: &mut IngestReport,
    ) -> Vec<(&'a Pending, Vec<f32>)> {
        let texts: Vec<String> = chunk.iter().map(|p| p.article.embedding_text()).collect();

        match self.embedder.embed_batch(&texts) {
            Ok(vectors) => chunk.iter().zip(vectors).collect(),
            Err(e) => {
                warn!(
                    "Batch of {} failed ({}); retrying individually",
                    chunk.len(),
                    e
                );
                let mut out = Vec::with_capacity(chunk.len());
                for (item, text) in chunk.iter().zip(&texts) {
                    match self.embedder.embed(text) {
                        Ok(vector) => out.push((item, vector)),
                        Err(e) => {
                            warn!("Failed to embed {}: {}", item.article.id, e);
                            report.fail(item.article.id.clone(), e);
                        }
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashingProvider};
    use crate::error::AstroError;
    use crate::storage::Storage;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn setup(provider: Arc<dyn EmbeddingProvider>) -> (Indexer, Storage, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(&temp.path().join("db.sqlite")).unwrap();
        let embedder = Arc::new(Embedder::new(provider, 256, 2));
        let indexer = Indexer::new(embedder, storage.articles.clone(), storage.vectors.clone());
        (indexer, storage, temp)
    }

    fn hashing() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashingProvider::new(64).unwrap())
    }

    fn article(id: &str, title: &str, body: &str) -> Article {
        Article {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            source_url: format!("https://example.com/{}", id),
            source: None,
        }
    }

    fn corpus() -> Vec<Article> {
        vec![
            article("a", "Falcon 9 launch", "SpaceX launches Starlink satellites"),
            article("b", "Comet discovered", "Astronomers spot a new comet"),
            article("c", "Dragon cargo", "Resupply mission docks with the station"),
        ]
    }

    #[test]
    fn test_second_run_is_noop() {
        let (indexer, storage, _temp) = setup(hashing());

        let first = indexer.ingest(corpus()).unwrap();
        assert_eq!(first.inserted, 3);
        assert!(first.failed.is_empty());

        let second = indexer.ingest(corpus()).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(storage.vectors.count(indexer.embedder.model_version()).unwrap(), 3);
    }

    #[test]
    fn test_changed_content_is_reembedded() {
        let (indexer, _storage, _temp) = setup(hashing());
        indexer.ingest(corpus()).unwrap();

        let mut changed = corpus();
        changed[1].body = "Astronomers spot a bright new comet near Jupiter".to_string();
        let report = indexer.ingest(changed).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_new_date_reaches_tie_break() {
        let (indexer, storage, _temp) = setup(hashing());
        let dated = |id: &str, day: u32| {
            let mut a = article(id, "Starship static fire", "Raptor engines lit on the pad");
            a.published_at = Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap();
            a
        };
        indexer.ingest(vec![dated("a", 1), dated("b", 2)]).unwrap();

        let query = indexer.embedder.embed("Starship static fire").unwrap();
        let version = indexer.embedder.model_version();
        let hits = storage.vectors.query_nearest(&query, 2, version).unwrap();
        assert_eq!(hits[0].article_id, "b");

        let report = indexer.ingest(vec![dated("a", 3)]).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 0);

        let hits = storage.vectors.query_nearest(&query, 2, version).unwrap();
        assert_eq!(hits[0].article_id, "a");
        assert_eq!(hits[0].published_at, dated("a", 3).published_at.timestamp());
        assert_eq!(
            storage.articles.get("a").unwrap().unwrap().published_at,
            dated("a", 3).published_at
        );
    }

    #[test]
    fn test_rejected_vectors_leave_no_article_rows() {
        let (indexer, storage, _temp) = setup(hashing());
        // Index already holds this model version at another dimension
        storage
            .vectors
            .upsert(VectorRecord {
                article_id: "legacy".to_string(),
                vector: vec![1.0, 0.0, 0.0],
                model_version: indexer.embedder.model_version().to_string(),
                content_hash: "legacy".to_string(),
                published_at: 0,
            })
            .unwrap();

        let result = indexer.ingest(vec![article("a", "Falcon 9 launch", "Starlink batch")]);
        assert!(matches!(result, Err(AstroError::Consistency { .. })));
        assert!(storage.articles.get("a").unwrap().is_none());
        assert!(storage.vectors.get("a").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let (indexer, storage, _temp) = setup(hashing());
        let report = indexer
            .ingest(vec![
                article("a", "Old title", "old body"),
                article("a", "New title", "new body"),
            ])
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(storage.articles.get("a").unwrap().unwrap().title, "New title");
    }

    #[test]
    fn test_failures_are_isolated() {
        let (indexer, storage, _temp) = setup(hashing());
        // All-stopword text cannot be embedded by the hashing backend
        let mut articles = corpus();
        articles.push(article("bad", "The", "and of the"));

        let report = indexer.ingest(articles).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].article_id, "bad");
        assert!(storage.articles.get("bad").unwrap().is_none());
    }

    #[test]
    fn test_ingest_raw_reports_invalid_records() {
        let (indexer, _storage, _temp) = setup(hashing());
        let records = vec![
            RawArticle {
                id: Some("ok".to_string()),
                title: Some("Artemis update".to_string()),
                body: Some("Crew training continues".to_string()),
                published_at: Some("2024-05-01T00:00:00Z".to_string()),
                source_url: Some("https://example.com/ok".to_string()),
                source: Some("NASA".to_string()),
            },
            RawArticle {
                id: Some("no-title".to_string()),
                ..Default::default()
            },
        ];

        let report = indexer.ingest_raw(records).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].article_id, "no-title");
    }

    #[test]
    fn test_migrate_reembeds_other_versions() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(&temp.path().join("db.sqlite")).unwrap();

        let old = Indexer::new(
            Arc::new(Embedder::new(Arc::new(HashingProvider::new(32).unwrap()), 256, 8)),
            storage.articles.clone(),
            storage.vectors.clone(),
        );
        old.ingest(corpus()).unwrap();

        let new = Indexer::new(
            Arc::new(Embedder::new(hashing(), 256, 8)),
            storage.articles.clone(),
            storage.vectors.clone(),
        );
        let report = new.migrate().unwrap();
        assert_eq!(report.updated, 3);
        assert_eq!(storage.vectors.count("hashing-v1-32").unwrap(), 0);
        assert_eq!(storage.vectors.count("hashing-v1-64").unwrap(), 3);
        assert_eq!(new.migrate().unwrap(), IngestReport::default());
    }

    #[test]
    fn test_concurrent_ingest_of_same_id() {
        let (indexer, storage, _temp) = setup(hashing());
        let indexer = Arc::new(indexer);

        let handles: Vec<_> = ["Crew Dragon docks at the station", "Soyuz lands in Kazakhstan"]
            .into_iter()
            .map(|body| {
                let indexer = indexer.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        indexer.ingest(vec![article("iss", "Station news", body)]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let version = indexer.embedder.model_version();
        assert_eq!(storage.vectors.total_count().unwrap(), 1);
        assert_eq!(storage.vectors.snapshot(version).unwrap().unwrap().ids().to_vec(), vec!["iss"]);

        // Vector, snapshot and article row all describe the same write
        let stored = storage.articles.get("iss").unwrap().unwrap();
        let record = storage.vectors.get("iss").unwrap().unwrap();
        assert_eq!(record.content_hash, stored.content_hash());
        let expected = indexer.embedder.embed(&stored.embedding_text()).unwrap();
        let hits = storage.vectors.query_nearest(&expected, 1, version).unwrap();
        assert_eq!(hits[0].article_id, "iss");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_delete() {
        let (indexer, storage, _temp) = setup(hashing());
        indexer.ingest(corpus()).unwrap();

        assert!(indexer.delete("a").unwrap());
        assert!(!indexer.delete("a").unwrap());
        assert_eq!(storage.vectors.total_count().unwrap(), 2);
    }
}
