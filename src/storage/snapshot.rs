//! Immutable in-memory vector index for one model version
//!
//! Rows are kept sorted by article id and packed into a row-major matrix, so
//! scoring a query is a single matrix-vector product. Snapshots are never
//! mutated: writers derive a new snapshot with [`IndexSnapshot::with_changes`]
//! and swap it in, readers keep whichever `Arc` they already hold.

use ndarray::{Array2, ArrayView1};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One indexed vector with the metadata used for tie-breaking
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub article_id: String,
    /// Unix seconds
    pub published_at: i64,
    /// L2-normalized
    pub vector: Vec<f32>,
}

/// A scored neighbour returned by nearest-neighbour queries
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub article_id: String,
    pub similarity: f32,
    pub published_at: i64,
}

#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    model_version: String,
    dimension: usize,
    ids: Vec<String>,
    published_at: Vec<i64>,
    positions: ahash::AHashMap<String, usize>,
    matrix: Array2<f32>,
}

impl IndexSnapshot {
    pub fn empty(model_version: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_version: model_version.into(),
            dimension,
            ids: Vec::new(),
            published_at: Vec::new(),
            positions: ahash::AHashMap::new(),
            matrix: Array2::zeros((0, dimension)),
        }
    }

    /// Build from rows; the last row wins for duplicate ids
    ///
    /// Every row must have `dimension` components.
    pub fn from_rows(
        model_version: impl Into<String>,
        dimension: usize,
        rows: impl IntoIterator<Item = IndexRow>,
    ) -> Self {
        let by_id: BTreeMap<String, IndexRow> = rows
            .into_iter()
            .map(|row| (row.article_id.clone(), row))
            .collect();

        let mut ids = Vec::with_capacity(by_id.len());
        let mut published_at = Vec::with_capacity(by_id.len());
        let mut flat = Vec::with_capacity(by_id.len() * dimension);
        for (id, row) in by_id {
            debug_assert_eq!(row.vector.len(), dimension);
            ids.push(id);
            published_at.push(row.published_at);
            flat.extend_from_slice(&row.vector);
        }

        let positions = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let matrix = Array2::from_shape_vec((ids.len(), dimension), flat)
            .unwrap_or_else(|_| Array2::zeros((0, dimension)));

        Self {
            model_version: model_version.into(),
            dimension,
            ids,
            published_at,
            positions,
            matrix,
        }
    }

    /// New snapshot with `upserts` applied and `deletes` removed
    pub fn with_changes(&self, upserts: &[IndexRow], deletes: &[String]) -> Self {
        let mut rows: BTreeMap<String, IndexRow> = self
            .rows()
            .map(|row| (row.article_id.clone(), row))
            .collect();
        for id in deletes {
            rows.remove(id);
        }
        for row in upserts {
            rows.insert(row.article_id.clone(), row.clone());
        }
        Self::from_rows(self.model_version.clone(), self.dimension, rows.into_values())
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, article_id: &str) -> bool {
        self.positions.contains_key(article_id)
    }

    pub fn vector(&self, article_id: &str) -> Option<ArrayView1<'_, f32>> {
        self.positions.get(article_id).map(|&i| self.matrix.row(i))
    }

    /// Rows in ascending article-id order
    pub fn rows(&self) -> impl Iterator<Item = IndexRow> + '_ {
        self.ids.iter().enumerate().map(|(i, id)| IndexRow {
            article_id: id.clone(),
            published_at: self.published_at[i],
            vector: self.matrix.row(i).to_vec(),
        })
    }

    /// Packed vectors, one row per article in [`IndexSnapshot::rows`] order
    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The `k` rows with the highest dot product against `query`
    ///
    /// Ordered by descending similarity, then newer `published_at`, then
    /// ascending article id, so the ranking is total and reproducible.
    /// `query` must be L2-normalized and `dimension` long.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let scores = self.matrix.dot(&ArrayView1::from(query));
        let mut order: Vec<usize> = (0..self.ids.len()).collect();

        let cmp = |a: &usize, b: &usize| -> Ordering {
            scores[*b]
                .total_cmp(&scores[*a])
                .then_with(|| self.published_at[*b].cmp(&self.published_at[*a]))
                .then_with(|| self.ids[*a].cmp(&self.ids[*b]))
        };

        if k < order.len() {
            order.select_nth_unstable_by(k - 1, cmp);
            order.truncate(k);
        }
        order.sort_by(cmp);

        order
            .into_iter()
            .map(|i| Neighbor {
                article_id: self.ids[i].clone(),
                similarity: scores[i],
                published_at: self.published_at[i],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, published_at: i64, vector: Vec<f32>) -> IndexRow {
        IndexRow {
            article_id: id.to_string(),
            published_at,
            vector,
        }
    }

    #[test]
    fn test_nearest_orders_by_similarity() {
        let snapshot = IndexSnapshot::from_rows(
            "m",
            2,
            vec![
                row("a", 0, vec![1.0, 0.0]),
                row("b", 0, vec![0.0, 1.0]),
                row("c", 0, vec![0.8, 0.6]),
            ],
        );

        let hits = snapshot.nearest(&[1.0, 0.0], 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.article_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_prefer_newer_then_id() {
        let v = vec![0.6, 0.8];
        let snapshot = IndexSnapshot::from_rows(
            "m",
            2,
            vec![
                row("old", 100, v.clone()),
                row("new", 200, v.clone()),
                row("new-b", 200, v.clone()),
            ],
        );

        let hits = snapshot.nearest(&v, 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.article_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "new-b", "old"]);
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let snapshot = IndexSnapshot::from_rows(
            "m",
            2,
            vec![row("a", 0, vec![1.0, 0.0]), row("b", 0, vec![0.0, 1.0])],
        );
        assert_eq!(snapshot.nearest(&[1.0, 0.0], 10).len(), 2);
        assert!(snapshot.nearest(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_partial_selection_matches_full_sort() {
        let rows: Vec<IndexRow> = (0..50)
            .map(|i| {
                let angle = i as f32 * 0.1;
                row(&format!("id{:02}", i), i % 7, vec![angle.cos(), angle.sin()])
            })
            .collect();
        let snapshot = IndexSnapshot::from_rows("m", 2, rows);

        let full = snapshot.nearest(&[1.0, 0.0], 50);
        let top = snapshot.nearest(&[1.0, 0.0], 5);
        assert_eq!(&full[..5], &top[..]);
    }

    #[test]
    fn test_with_changes_is_copy_on_write() {
        let base = IndexSnapshot::from_rows("m", 2, vec![row("a", 0, vec![1.0, 0.0])]);
        let next = base.with_changes(&[row("b", 0, vec![0.0, 1.0])], &["a".to_string()]);

        assert!(base.contains("a"));
        assert!(!base.contains("b"));
        assert!(next.contains("b"));
        assert!(!next.contains("a"));
        assert_eq!(next.len(), 1);
    }
}
