//! Hybrid re-ranking: semantic + keyword + recency
//!
//! Semantic neighbours are the candidate pool; each candidate's three
//! component scores are normalized over the pool and blended with the
//! configured weights.

use super::keyword::{keyword_score, passes_must_have};
use super::recency::recency_boost;
use super::SearchResult;
use crate::config::HybridConfig;
use crate::corpus::Article;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Per-component scores behind a hybrid ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridScores {
    pub final_score: f32,
    /// Min-max normalized over the candidate pool
    pub semantic: f32,
    /// Divided by the pool maximum
    pub keyword: f32,
    pub recency: f32,
    pub semantic_raw: f32,
    pub keyword_raw: f32,
    /// Whether the must-have penalty was applied
    pub penalized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub scores: HybridScores,
}

/// Re-rank `(similarity, article)` candidates and keep the best `k`
pub fn rerank(
    query: &str,
    candidates: Vec<(f32, Article)>,
    k: usize,
    now: DateTime<Utc>,
    config: &HybridConfig,
) -> Vec<HybridResult> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let keyword_raw: Vec<f32> = candidates
        .iter()
        .map(|(_, a)| keyword_score(query, &a.title, &a.body))
        .collect();

    let (smin, smax) = candidates
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (s, _)| {
            (lo.min(*s), hi.max(*s))
        });
    let sden = (smax - smin).max(1e-9);
    let kmax = keyword_raw.iter().copied().fold(0.0f32, f32::max).max(1e-9);

    let mut results: Vec<HybridResult> = candidates
        .into_iter()
        .zip(keyword_raw)
        .map(|((similarity, article), kw_raw)| {
            let semantic = (similarity - smin) / sden;
            let keyword = kw_raw / kmax;
            let recency = recency_boost(article.published_at, now, config.recency_tau_days);

            let mut final_score = config.semantic_weight * semantic
                + config.keyword_weight * keyword
                + config.recency_weight * recency;
            let penalized = !passes_must_have(query, &article.title, &article.body);
            if penalized {
                final_score *= config.must_have_penalty;
            }

            HybridResult {
                result: SearchResult::from_article(article, similarity),
                scores: HybridScores {
                    final_score,
                    semantic,
                    keyword,
                    recency,
                    semantic_raw: similarity,
                    keyword_raw: kw_raw,
                    penalized,
                },
            }
        })
        .collect();

    results.sort_by(compare);
    results.truncate(k);
    results
}

fn compare(a: &HybridResult, b: &HybridResult) -> Ordering {
    b.scores
        .final_score
        .total_cmp(&a.scores.final_score)
        .then_with(|| b.result.published_at.cmp(&a.result.published_at))
        .then_with(|| a.result.article_id.cmp(&b.result.article_id))
}
