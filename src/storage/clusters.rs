//! Persisted clustering runs
//!
//! A run, its assignments and its exemplars are written in one transaction;
//! readers see either the whole run or none of it.

use super::{Database, StoreError};
use crate::clustering::{ClusterAssignment, ClusterExemplar, ClusterRun};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Run metadata without the per-article assignments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRunSummary {
    pub run_id: Uuid,
    pub model_version: String,
    pub k_requested: usize,
    pub k_effective: usize,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub created_at: DateTime<Utc>,
}

pub struct ClusterStore {
    db: Arc<Database>,
}

impl ClusterStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a complete run atomically
    pub fn commit_run(&self, run: &ClusterRun) -> Result<()> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let run_id = run.run_id.to_string();

        tx.execute(
            "INSERT INTO cluster_runs
                (run_id, model_version, k_requested, k_effective, iterations, converged, inertia, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                run.model_version,
                run.k_requested as i64,
                run.k_effective as i64,
                run.iterations as i64,
                run.converged,
                run.inertia,
                run.created_at.timestamp_millis(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cluster_assignments (run_id, article_id, cluster_id, distance_to_centroid)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for assignment in run.assignments.values() {
                stmt.execute(params![
                    run_id,
                    assignment.article_id,
                    assignment.cluster_id as i64,
                    assignment.distance_to_centroid as f64,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO cluster_exemplars (run_id, cluster_id, article_id, title, size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for exemplar in &run.exemplars {
                stmt.execute(params![
                    run_id,
                    exemplar.cluster_id as i64,
                    exemplar.article_id,
                    exemplar.title,
                    exemplar.size as i64,
                ])?;
            }
        }

        tx.commit().map_err(StoreError::from)?;
        tracing::debug!(
            "Committed cluster run {} ({} assignments)",
            run.run_id,
            run.assignments.len()
        );
        Ok(())
    }

    /// Most recently committed run, fully loaded
    pub fn latest_run(&self) -> Result<Option<ClusterRun>> {
        let summary = {
            let conn = self.db.get_conn()?;
            conn.query_row(
                &format!("{} ORDER BY created_at DESC, rowid DESC LIMIT 1", SUMMARY_SELECT),
                [],
                summary_row,
            )
            .optional()?
        };
        match summary {
            Some(summary) => self.load(summary?).map(Some),
            None => Ok(None),
        }
    }

    pub fn run(&self, run_id: &Uuid) -> Result<Option<ClusterRun>> {
        let summary = {
            let conn = self.db.get_conn()?;
            conn.query_row(
                &format!("{} WHERE run_id = ?1", SUMMARY_SELECT),
                params![run_id.to_string()],
                summary_row,
            )
            .optional()?
        };
        match summary {
            Some(summary) => self.load(summary?).map(Some),
            None => Ok(None),
        }
    }

    /// All runs, newest first
    pub fn runs(&self) -> Result<Vec<ClusterRunSummary>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_at DESC, rowid DESC",
            SUMMARY_SELECT
        ))?;
        let rows = stmt
            .query_map([], summary_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|r| r.map_err(Into::into))
            .collect()
    }

    pub fn assignments_for(&self, run_id: &Uuid) -> Result<BTreeMap<String, ClusterAssignment>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT article_id, cluster_id, distance_to_centroid
             FROM cluster_assignments WHERE run_id = ?1",
        )?;
        let rows = stmt.query_map(params![run_id.to_string()], |row| {
            Ok(ClusterAssignment {
                article_id: row.get(0)?,
                cluster_id: row.get::<_, i64>(1)? as usize,
                distance_to_centroid: row.get::<_, f64>(2)? as f32,
            })
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let assignment = row?;
            out.insert(assignment.article_id.clone(), assignment);
        }
        Ok(out)
    }

    pub fn exemplars_for(&self, run_id: &Uuid) -> Result<Vec<ClusterExemplar>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cluster_id, article_id, title, size
             FROM cluster_exemplars WHERE run_id = ?1 ORDER BY cluster_id",
        )?;
        let exemplars = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok(ClusterExemplar {
                    cluster_id: row.get::<_, i64>(0)? as usize,
                    article_id: row.get(1)?,
                    title: row.get(2)?,
                    size: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(exemplars)
    }

    fn load(&self, summary: ClusterRunSummary) -> Result<ClusterRun> {
        let assignments = self.assignments_for(&summary.run_id)?;
        let exemplars = self.exemplars_for(&summary.run_id)?;
        Ok(ClusterRun {
            run_id: summary.run_id,
            model_version: summary.model_version,
            k_requested: summary.k_requested,
            k_effective: summary.k_effective,
            adjusted: summary.k_effective < summary.k_requested,
            iterations: summary.iterations,
            converged: summary.converged,
            inertia: summary.inertia,
            created_at: summary.created_at,
            assignments,
            exemplars,
        })
    }
}

const SUMMARY_SELECT: &str = "SELECT run_id, model_version, k_requested, k_effective, \
     iterations, converged, inertia, created_at FROM cluster_runs";

/// Decodes a summary row; the inner result carries malformed-value errors
fn summary_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<std::result::Result<ClusterRunSummary, StoreError>> {
    let run_id: String = row.get(0)?;
    let created_at: i64 = row.get(7)?;

    let run_id = match Uuid::parse_str(&run_id) {
        Ok(id) => id,
        Err(e) => return Ok(Err(StoreError::Corrupt(format!("run id {}: {}", run_id, e)))),
    };
    let created_at = match DateTime::from_timestamp_millis(created_at) {
        Some(ts) => ts,
        None => {
            return Ok(Err(StoreError::Corrupt(format!(
                "run {} has timestamp {}",
                run_id, created_at
            ))))
        }
    };

    Ok(Ok(ClusterRunSummary {
        run_id,
        model_version: row.get(1)?,
        k_requested: row.get::<_, i64>(2)? as usize,
        k_effective: row.get::<_, i64>(3)? as usize,
        iterations: row.get::<_, i64>(4)? as usize,
        converged: row.get(5)?,
        inertia: row.get(6)?,
        created_at,
    }))
}
