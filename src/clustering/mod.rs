//! Topic clustering over the embedding index
//!
//! A run reads one point-in-time snapshot, partitions it with k-means and
//! commits the run atomically. Cluster ids are only meaningful within their
//! run; exemplars (the article nearest each centroid) are the anchor for
//! relating clusters across runs.

mod kmeans;

pub use kmeans::{kmeans, KMeansConfig, KMeansResult};

use crate::config::ClusteringConfig;
use crate::error::{AstroError, Result};
use crate::storage::{ArticleStore, ClusterStore, VectorStore};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    pub article_id: String,
    /// Index in `0..k_effective`, scoped to its run
    pub cluster_id: usize,
    pub distance_to_centroid: f32,
}

/// Article nearest to a cluster's centroid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterExemplar {
    pub cluster_id: usize,
    pub article_id: String,
    pub title: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRun {
    pub run_id: Uuid,
    pub model_version: String,
    pub k_requested: usize,
    pub k_effective: usize,
    /// True when `k_requested` exceeded the article count and was reduced
    pub adjusted: bool,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub created_at: DateTime<Utc>,
    pub assignments: BTreeMap<String, ClusterAssignment>,
    pub exemplars: Vec<ClusterExemplar>,
}

impl ClusterRun {
    /// Article ids per cluster, in id order
    pub fn members(&self) -> Vec<Vec<&str>> {
        let mut members = vec![Vec::new(); self.k_effective];
        for assignment in self.assignments.values() {
            if let Some(group) = members.get_mut(assignment.cluster_id) {
                group.push(assignment.article_id.as_str());
            }
        }
        members
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "run", rename_all = "snake_case")]
pub enum ClusterOutcome {
    Clustered(ClusterRun),
    EmptyIndex,
}

/// Shared flag that asks a running clustering job to stop
///
/// Cancelling and committing exclude each other: once [`CancelFlag::cancel`]
/// returns `true` the job can no longer commit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    /// Held for the duration of a commit; `true` once it succeeded
    committed: Mutex<bool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the job; `false` when it already committed
    ///
    /// Waits for an in-flight commit to finish before deciding.
    pub fn cancel(&self) -> bool {
        let committed = self
            .0
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *committed {
            return false;
        }
        self.0.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Run `commit` unless the job was cancelled first
    pub fn commit_with<T>(&self, commit: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut committed = self
            .0
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return Err(AstroError::Cancelled);
        }
        let out = commit()?;
        *committed = true;
        Ok(out)
    }
}

pub struct ClusterEngine {
    vectors: Arc<VectorStore>,
    articles: Arc<ArticleStore>,
    runs: Arc<ClusterStore>,
    model_version: String,
    config: ClusteringConfig,
}

impl ClusterEngine {
    pub fn new(
        vectors: Arc<VectorStore>,
        articles: Arc<ArticleStore>,
        runs: Arc<ClusterStore>,
        model_version: impl Into<String>,
        config: ClusteringConfig,
    ) -> Self {
        Self {
            vectors,
            articles,
            runs,
            model_version: model_version.into(),
            config,
        }
    }

    /// Cluster the active model's vectors into `k` groups and commit the run
    pub fn cluster(&self, k: usize, cancel: &CancelFlag) -> Result<ClusterOutcome> {
        self.cluster_version(k, &self.model_version, cancel, None)
    }

    /// Cluster `model_version`'s vectors, giving up at `deadline`
    ///
    /// Cancellation and the deadline are checked every iteration and once
    /// more before commit; an interrupted run writes nothing and previously
    /// committed runs stay intact. The final check and the commit run under
    /// `cancel`'s commit lock.
    pub fn cluster_version(
        &self,
        k: usize,
        model_version: &str,
        cancel: &CancelFlag,
        deadline: Option<Instant>,
    ) -> Result<ClusterOutcome> {
        if k == 0 {
            return Err(AstroError::input("k must be greater than 0"));
        }

        let started = Instant::now();
        let check = || -> Result<()> {
            if cancel.is_cancelled() {
                return Err(AstroError::Cancelled);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => Err(AstroError::TimedOut {
                    secs: deadline.saturating_duration_since(started).as_secs(),
                }),
                _ => Ok(()),
            }
        };

        let snapshot = match self.vectors.snapshot(model_version)? {
            Some(snapshot) => snapshot,
            None => {
                return match self.vectors.model_versions()?.into_iter().next() {
                    Some((indexed, _)) => Err(AstroError::Consistency {
                        indexed,
                        requested: model_version.to_string(),
                    }),
                    None => Ok(ClusterOutcome::EmptyIndex),
                }
            }
        };

        let n = snapshot.len();
        let k_effective = k.min(n);
        if k_effective < k {
            warn!(
                "Requested {} clusters but only {} articles are indexed; using k={}",
                k, n, k_effective
            );
        }

        let config = KMeansConfig::new(
            k_effective,
            self.config.max_iterations,
            self.config.convergence_threshold,
        )?;
        let result = kmeans(snapshot.matrix().view(), &config, check)?;

        let ids = snapshot.ids();
        let assignments: BTreeMap<String, ClusterAssignment> = ids
            .iter()
            .zip(result.labels.iter().zip(&result.distances))
            .map(|(id, (&cluster_id, &distance))| {
                (
                    id.clone(),
                    ClusterAssignment {
                        article_id: id.clone(),
                        cluster_id,
                        distance_to_centroid: distance,
                    },
                )
            })
            .collect();

        let exemplar_rows = result.exemplars();
        let exemplar_ids: Vec<String> = exemplar_rows.iter().map(|&r| ids[r].clone()).collect();
        let titles: HashMap<String, String> = self
            .articles
            .get_many(&exemplar_ids)?
            .into_iter()
            .map(|a| (a.id, a.title))
            .collect();
        let sizes = result.cluster_sizes();
        let exemplars = exemplar_rows
            .iter()
            .map(|&row| {
                let cluster_id = result.labels[row];
                let article_id = ids[row].clone();
                ClusterExemplar {
                    cluster_id,
                    title: titles.get(&article_id).cloned().unwrap_or_default(),
                    article_id,
                    size: sizes[cluster_id],
                }
            })
            .collect();

        let run = ClusterRun {
            run_id: Uuid::new_v4(),
            model_version: model_version.to_string(),
            k_requested: k,
            k_effective,
            adjusted: k_effective < k,
            iterations: result.iterations,
            converged: result.converged,
            inertia: result.inertia,
            // Millisecond precision, as persisted
            created_at: Utc::now().trunc_subsecs(3),
            assignments,
            exemplars,
        };

        cancel.commit_with(|| {
            check()?;
            self.runs.commit_run(&run)
        })?;

        info!(
            "Cluster run {}: {} articles into {} clusters in {} iterations ({:?})",
            run.run_id,
            n,
            k_effective,
            run.iterations,
            started.elapsed()
        );
        Ok(ClusterOutcome::Clustered(run))
    }

    /// Most recently committed run
    pub fn latest_run(&self) -> Result<Option<ClusterRun>> {
        self.runs.latest_run()
    }

    pub fn assignments_for(&self, run_id: &Uuid) -> Result<BTreeMap<String, ClusterAssignment>> {
        self.runs.assignments_for(run_id)
    }

    pub fn default_k(&self) -> usize {
        self.config.default_k
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}
