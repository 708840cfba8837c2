//! Request-facing facade
//!
//! Owns the process-wide embedder and the components built on it. Every
//! operation runs on tokio's blocking pool so async callers never stall on
//! model inference, SQLite or k-means.

use crate::clustering::{CancelFlag, ClusterEngine, ClusterOutcome, ClusterRun};
use crate::config::Config;
use crate::corpus::{dedupe_by_url, latest_jsonl, load_jsonl, Article, RawArticle};
use crate::embedding::Embedder;
use crate::error::{AstroError, Result};
use crate::indexer::{IngestReport, Indexer};
use crate::retrieval::{HybridResult, SearchEngine, SearchOutcome};
use crate::storage::{ClusterRunSummary, Storage};
use crate::summarizer::{Summarizer, Summary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Snapshot of what is indexed
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub articles: usize,
    /// Vector counts per model version, largest first
    pub embeddings: Vec<ModelCount>,
    pub active_model: String,
    pub dimension: usize,
    pub summaries: usize,
    pub cluster_runs: usize,
    pub latest_run: Option<ClusterRunSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelCount {
    pub model_version: String,
    pub count: usize,
}

pub struct NewsService {
    config: Config,
    storage: Storage,
    embedder: Arc<Embedder>,
    indexer: Arc<Indexer>,
    search: Arc<SearchEngine>,
    clusters: Arc<ClusterEngine>,
    summarizer: Arc<Summarizer>,
}

impl NewsService {
    /// Open storage and load the embedding model named in `config`
    pub fn open(config: &Config) -> Result<Self> {
        let cache_dir = config.data_dir()?.join("models");
        let embedder = Arc::new(Embedder::from_config(&config.embedding, Some(cache_dir))?);
        Self::with_embedder(config, embedder)
    }

    /// Open storage around an already-initialised embedder
    pub fn with_embedder(config: &Config, embedder: Arc<Embedder>) -> Result<Self> {
        let db_path = config.database_path()?;
        let storage = Storage::open(&db_path)?;
        info!("Opened store at {}", db_path.display());

        let stale = storage
            .vectors
            .model_versions()?
            .into_iter()
            .filter(|(version, _)| version != embedder.model_version())
            .map(|(_, count)| count)
            .sum::<usize>();
        if stale > 0 {
            warn!(
                "{} vectors were produced by another model; run `migrate` to re-embed them",
                stale
            );
        }

        let indexer = Arc::new(Indexer::new(
            embedder.clone(),
            storage.articles.clone(),
            storage.vectors.clone(),
        ));
        let search = Arc::new(SearchEngine::new(
            embedder.clone(),
            storage.articles.clone(),
            storage.vectors.clone(),
            config.search.hybrid.clone(),
        ));
        let clusters = Arc::new(ClusterEngine::new(
            storage.vectors.clone(),
            storage.articles.clone(),
            storage.clusters.clone(),
            embedder.model_version(),
            config.clustering.clone(),
        ));
        let summarizer = Arc::new(Summarizer::from_config(&config.summarizer));

        Ok(Self {
            config: config.clone(),
            storage,
            embedder,
            indexer,
            search,
            clusters,
            summarizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store reachable and embedder loaded
    pub fn is_ready(&self) -> bool {
        self.storage.is_ready() && self.embedder.dimension() > 0
    }

    pub async fn ingest(&self, articles: Vec<Article>) -> Result<IngestReport> {
        let indexer = self.indexer.clone();
        blocking(move || indexer.ingest(articles)).await
    }

    pub async fn ingest_raw(&self, records: Vec<RawArticle>) -> Result<IngestReport> {
        let indexer = self.indexer.clone();
        blocking(move || indexer.ingest_raw(records)).await
    }

    /// Ingest a JSONL file, or the newest `*.jsonl` in a directory
    pub async fn ingest_path(&self, path: PathBuf) -> Result<IngestReport> {
        let indexer = self.indexer.clone();
        blocking(move || {
            let file = if path.is_dir() {
                latest_jsonl(&path)?
            } else {
                path
            };
            info!("Ingesting {}", file.display());

            let mut corpus = load_jsonl(&file)?;
            corpus.records = dedupe_by_url(corpus.records);
            indexer.ingest_corpus(corpus)
        })
        .await
    }

    /// Semantic search with the configured similarity floor
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome> {
        self.search_with(query, k, self.config.search.min_similarity)
            .await
    }

    pub async fn search_with(
        &self,
        query: &str,
        k: usize,
        min_similarity: f32,
    ) -> Result<SearchOutcome> {
        let search = self.search.clone();
        let query = query.to_string();
        blocking(move || search.search(&query, k, min_similarity)).await
    }

    pub async fn search_hybrid(
        &self,
        query: &str,
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<SearchOutcome<HybridResult>> {
        let search = self.search.clone();
        let query = query.to_string();
        blocking(move || search.search_hybrid(&query, k, now)).await
    }

    /// Cluster the index, giving up after `timeout` (the configured limit when `None`)
    pub async fn cluster(&self, k: usize, timeout: Option<Duration>) -> Result<ClusterOutcome> {
        self.cluster_cancellable(k, timeout, CancelFlag::new())
            .await
    }

    /// As [`NewsService::cluster`], also stopping when `cancel` is raised
    pub async fn cluster_cancellable(
        &self,
        k: usize,
        timeout: Option<Duration>,
        cancel: CancelFlag,
    ) -> Result<ClusterOutcome> {
        let timeout = timeout.unwrap_or_else(|| self.clusters.timeout());
        let deadline = Instant::now() + timeout;
        let engine = self.clusters.clone();
        let model_version = self.embedder.model_version().to_string();
        let flag = cancel.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            engine.cluster_version(k, &model_version, &flag, Some(deadline))
        });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined.map_err(join_error)?,
            Err(_) => {
                // Waits out a commit already in progress
                let stopper = cancel.clone();
                if blocking(move || Ok(stopper.cancel())).await? {
                    warn!("Clustering exceeded {:?}; cancelled", timeout);
                    Err(AstroError::TimedOut {
                        secs: timeout.as_secs(),
                    })
                } else {
                    // Committed at the deadline; report the stored run
                    task.await.map_err(join_error)?
                }
            }
        }
    }

    pub async fn latest_run(&self) -> Result<Option<ClusterRun>> {
        let engine = self.clusters.clone();
        blocking(move || engine.latest_run()).await
    }

    /// Summarize an article and cache the summary on its row
    pub async fn summarize(&self, article_id: &str, max_length: Option<usize>) -> Result<Summary> {
        let articles = self.storage.articles.clone();
        let summarizer = self.summarizer.clone();
        let article_id = article_id.to_string();
        let max_length = max_length.unwrap_or_else(|| summarizer.default_max_length());

        blocking(move || {
            let article = articles
                .get(&article_id)?
                .ok_or_else(|| AstroError::input(format!("unknown article: {}", article_id)))?;

            let summary = summarizer.summarize(&article.embedding_text(), max_length);
            if let Err(e) = articles.set_summary(&article_id, &summary.text) {
                warn!("Failed to cache summary for {}: {}", article_id, e);
            }
            Ok(summary)
        })
        .await
    }

    pub async fn delete(&self, article_id: &str) -> Result<bool> {
        let indexer = self.indexer.clone();
        let article_id = article_id.to_string();
        blocking(move || indexer.delete(&article_id)).await
    }

    /// Re-embed every article indexed under another model version
    pub async fn migrate(&self) -> Result<IngestReport> {
        let indexer = self.indexer.clone();
        blocking(move || indexer.migrate()).await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let database = self.storage.database.clone();
        let vectors = self.storage.vectors.clone();
        let runs = self.storage.clusters.clone();
        let active_model = self.embedder.model_version().to_string();
        let dimension = self.embedder.dimension();

        blocking(move || {
            let stats = database.stats()?;
            let embeddings = vectors
                .model_versions()?
                .into_iter()
                .map(|(model_version, count)| ModelCount {
                    model_version,
                    count,
                })
                .collect();
            let latest_run = runs.runs()?.into_iter().next();

            Ok(IndexStatus {
                articles: stats.article_count,
                embeddings,
                active_model,
                dimension,
                summaries: stats.summary_count,
                cluster_runs: stats.cluster_run_count,
                latest_run,
            })
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> AstroError {
    AstroError::Other(anyhow::anyhow!("worker task failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HASHING_BACKEND;
    use tempfile::TempDir;

    fn service() -> (NewsService, TempDir) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp.path().to_path_buf();
        config.embedding.model = HASHING_BACKEND.to_string();
        config.embedding.dim = 256;
        (NewsService::open(&config).unwrap(), temp)
    }

    fn raw(id: &str, title: &str, body: &str) -> RawArticle {
        RawArticle {
            id: Some(id.to_string()),
            title: Some(title.to_string()),
            body: Some(body.to_string()),
            published_at: Some("2024-06-01T00:00:00Z".to_string()),
            source_url: Some(format!("https://example.com/{}", id)),
            source: None,
        }
    }

    #[tokio::test]
    async fn test_ready_and_empty_status() {
        let (service, _temp) = service();
        assert!(service.is_ready());

        let status = service.status().await.unwrap();
        assert_eq!(status.articles, 0);
        assert_eq!(status.active_model, "hashing-v1-256");
        assert!(status.latest_run.is_none());
    }

    #[tokio::test]
    async fn test_summarize_caches_on_article() {
        let (service, _temp) = service();
        service
            .ingest_raw(vec![raw(
                "a",
                "Starship test flight",
                "The vehicle reached orbit. Engineers were pleased.",
            )])
            .await
            .unwrap();

        let summary = service.summarize("a", None).await.unwrap();
        assert!(!summary.text.is_empty());
        assert_eq!(
            service.storage.articles.summary("a").unwrap(),
            Some(summary.text.clone())
        );
        assert_eq!(service.status().await.unwrap().summaries, 1);

        assert!(matches!(
            service.summarize("missing", None).await,
            Err(AstroError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_cluster_zero_timeout_writes_nothing() {
        let (service, _temp) = service();
        service
            .ingest_raw(vec![
                raw("a", "Comet", "Bright comet"),
                raw("b", "Rocket", "Launch today"),
            ])
            .await
            .unwrap();

        let result = service.cluster(2, Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(AstroError::TimedOut { .. })));
        assert!(service.latest_run().await.unwrap().is_none());
    }
}
