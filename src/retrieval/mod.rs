//! Semantic search over the embedding index
//!
//! Queries are embedded with the same embedder that built the index and
//! ranked by cosine similarity against one model version's snapshot. Hybrid
//! mode re-ranks a pool of semantic neighbours with keyword and recency
//! signals.

mod hybrid;
mod keyword;
mod recency;

pub use hybrid::{rerank, HybridResult, HybridScores};
pub use keyword::{keyword_score, passes_must_have};
pub use recency::recency_boost;

use crate::config::HybridConfig;
use crate::corpus::{normalize_text, Article};
use crate::embedding::Embedder;
use crate::error::{AstroError, Result};
use crate::storage::{ArticleStore, Neighbor, VectorStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub article_id: String,
    pub title: String,
    /// Cosine similarity to the query, in [-1, 1]
    pub similarity: f32,
    pub source_url: String,
    /// Publisher name, if known
    pub source: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl SearchResult {
    fn from_article(article: Article, similarity: f32) -> Self {
        Self {
            article_id: article.id,
            title: article.title,
            similarity,
            source_url: article.source_url,
            source: article.source,
            published_at: article.published_at,
        }
    }
}

/// Search response; an empty index is an answer, not a fault
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "results", rename_all = "snake_case")]
pub enum SearchOutcome<T = SearchResult> {
    Results(Vec<T>),
    EmptyIndex,
}

impl<T> SearchOutcome<T> {
    /// Hits in rank order; empty for [`SearchOutcome::EmptyIndex`]
    pub fn results(&self) -> &[T] {
        match self {
            SearchOutcome::Results(results) => results,
            SearchOutcome::EmptyIndex => &[],
        }
    }

    pub fn is_empty_index(&self) -> bool {
        matches!(self, SearchOutcome::EmptyIndex)
    }
}

pub struct SearchEngine {
    embedder: Arc<Embedder>,
    articles: Arc<ArticleStore>,
    vectors: Arc<VectorStore>,
    hybrid: HybridConfig,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<Embedder>,
        articles: Arc<ArticleStore>,
        vectors: Arc<VectorStore>,
        hybrid: HybridConfig,
    ) -> Self {
        Self {
            embedder,
            articles,
            vectors,
            hybrid,
        }
    }

    /// The `k` articles most similar to `query` with similarity ≥ `min_similarity`
    ///
    /// Identical query and index state always yield the identical ranking.
    pub fn search(&self, query: &str, k: usize, min_similarity: f32) -> Result<SearchOutcome> {
        validate(query, k)?;
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(AstroError::input(format!(
                "min_similarity must be within [-1, 1], got {}",
                min_similarity
            )));
        }

        let Some(neighbors) = self.nearest(query, k)? else {
            return Ok(SearchOutcome::EmptyIndex);
        };

        let kept: Vec<Neighbor> = neighbors
            .into_iter()
            .filter(|n| n.similarity >= min_similarity)
            .collect();
        debug!("Search '{}': {} hits above {}", query, kept.len(), min_similarity);

        let results = self
            .join(kept)?
            .into_iter()
            .map(|(similarity, article)| SearchResult::from_article(article, similarity))
            .collect();
        Ok(SearchOutcome::Results(results))
    }

    /// Semantic candidates re-ranked with keyword and recency signals
    ///
    /// `now` anchors the recency decay so rankings are reproducible.
    pub fn search_hybrid(
        &self,
        query: &str,
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<SearchOutcome<HybridResult>> {
        validate(query, k)?;

        let pool = self.hybrid.candidate_pool.max(k);
        let Some(neighbors) = self.nearest(query, pool)? else {
            return Ok(SearchOutcome::EmptyIndex);
        };

        let candidates = self.join(neighbors)?;
        debug!("Hybrid search '{}': {} candidates", query, candidates.len());
        Ok(SearchOutcome::Results(rerank(
            query,
            candidates,
            k,
            now,
            &self.hybrid,
        )))
    }

    /// `None` when nothing at all is indexed
    fn nearest(&self, query: &str, k: usize) -> Result<Option<Vec<Neighbor>>> {
        if self.vectors.is_empty()? {
            return Ok(None);
        }
        let vector = self.embedder.embed(query)?;
        let neighbors = self
            .vectors
            .query_nearest(&vector, k, self.embedder.model_version())?;
        Ok(Some(neighbors))
    }

    /// Attach article rows to neighbours, preserving rank order
    fn join(&self, neighbors: Vec<Neighbor>) -> Result<Vec<(f32, Article)>> {
        let ids: Vec<String> = neighbors.iter().map(|n| n.article_id.clone()).collect();
        let mut by_id: HashMap<String, Article> = self
            .articles
            .get_many(&ids)?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        Ok(neighbors
            .into_iter()
            .filter_map(|n| match by_id.remove(&n.article_id) {
                Some(article) => Some((n.similarity, article)),
                None => {
                    warn!("Indexed article {} has no article row", n.article_id);
                    None
                }
            })
            .collect())
    }
}

fn validate(query: &str, k: usize) -> Result<()> {
    if k == 0 {
        return Err(AstroError::input("k must be greater than 0"));
    }
    if normalize_text(query).is_empty() {
        return Err(AstroError::input("query is empty"));
    }
    Ok(())
}
