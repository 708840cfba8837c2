//! Persistent vector store keyed by article id
//!
//! Holds exactly one current embedding per article. Re-embedding an article
//! under a different model version supersedes its old vector; queries only
//! ever score vectors of a single model version.

use super::snapshot::{IndexRow, IndexSnapshot, Neighbor};
use super::{unix_now, Database, StoreError};
use crate::embedding::l2_normalize;
use crate::error::{AstroError, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// A vector to write, with the metadata the store keeps alongside it
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub article_id: String,
    pub vector: Vec<f32>,
    pub model_version: String,
    /// Hash of the text the vector was computed from
    pub content_hash: String,
    /// Unix seconds, used to break similarity ties
    pub published_at: i64,
}

/// What a stored vector was computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub model_version: String,
    pub content_hash: String,
    pub published_at: i64,
}

/// A persisted embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub article_id: String,
    pub vector: Vec<f32>,
    pub model_version: String,
    pub content_hash: String,
    pub created_at: i64,
}

pub struct VectorStore {
    db: Arc<Database>,
    snapshots: RwLock<HashMap<String, Arc<IndexSnapshot>>>,
    /// Serializes commit + snapshot swap so concurrent writers never lose updates
    write_lock: Mutex<()>,
}

impl VectorStore {
    /// Open the store and load every persisted vector into memory
    pub fn open(db: Arc<Database>) -> Result<Self> {
        let mut grouped: HashMap<String, (usize, Vec<IndexRow>)> = HashMap::new();
        {
            let conn = db.get_conn()?;
            let mut stmt = conn.prepare(
                "SELECT article_id, model_version, dim, vector, published_at FROM embeddings",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;

            for row in rows {
                let (article_id, model_version, dim, blob, published_at) = row?;
                let dim = dim as usize;
                let vector = decode_vector(&blob, dim)?;
                let entry = grouped
                    .entry(model_version.clone())
                    .or_insert_with(|| (dim, Vec::new()));
                if entry.0 != dim {
                    return Err(StoreError::Corrupt(format!(
                        "model {} has vectors of dimension {} and {}",
                        model_version, entry.0, dim
                    ))
                    .into());
                }
                entry.1.push(IndexRow {
                    article_id,
                    published_at,
                    vector,
                });
            }
        }

        let snapshots: HashMap<String, Arc<IndexSnapshot>> = grouped
            .into_iter()
            .map(|(version, (dim, rows))| {
                let snapshot = IndexSnapshot::from_rows(version.clone(), dim, rows);
                info!(
                    "Loaded {} vectors for model {} ({}D)",
                    snapshot.len(),
                    version,
                    dim
                );
                (version, Arc::new(snapshot))
            })
            .collect();

        Ok(Self {
            db,
            snapshots: RwLock::new(snapshots),
            write_lock: Mutex::new(()),
        })
    }

    /// Insert or replace the vector for one article
    pub fn upsert(&self, record: VectorRecord) -> Result<()> {
        self.bulk_upsert(vec![record]).map(|_| ())
    }

    /// Insert or replace many vectors in one transaction
    ///
    /// Same semantics as [`VectorStore::upsert`]; for duplicate ids within the
    /// batch the last record wins. Returns the number of distinct articles written.
    pub fn bulk_upsert(&self, records: Vec<VectorRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut latest: BTreeMap<String, VectorRecord> = BTreeMap::new();
        for mut record in records {
            if record.article_id.trim().is_empty() {
                return Err(AstroError::input("article_id cannot be empty"));
            }
            record.vector = l2_normalize(record.vector).ok_or_else(|| {
                AstroError::input(format!(
                    "vector for {} is zero or not finite",
                    record.article_id
                ))
            })?;
            latest.insert(record.article_id.clone(), record);
        }

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let current = self.read_snapshots()?;

        // Dimension is fixed per model version, by the index or by this batch
        let mut dims: HashMap<&str, usize> = HashMap::new();
        for record in latest.values() {
            let expected = current
                .get(&record.model_version)
                .filter(|s| !s.is_empty())
                .map(|s| s.dimension())
                .or_else(|| dims.get(record.model_version.as_str()).copied())
                .unwrap_or(record.vector.len());
            if expected != record.vector.len() {
                return Err(AstroError::Consistency {
                    indexed: format!("{} ({}D)", record.model_version, expected),
                    requested: format!("{} ({}D)", record.model_version, record.vector.len()),
                });
            }
            dims.insert(record.model_version.as_str(), expected);
        }

        let now = unix_now();
        {
            let mut conn = self.db.get_conn()?;
            let tx = conn.transaction().map_err(StoreError::from)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO embeddings
                        (article_id, model_version, dim, vector, content_hash, published_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(article_id) DO UPDATE SET
                        model_version = excluded.model_version,
                        dim = excluded.dim,
                        vector = excluded.vector,
                        content_hash = excluded.content_hash,
                        published_at = excluded.published_at,
                        created_at = excluded.created_at",
                )?;
                for record in latest.values() {
                    stmt.execute(params![
                        record.article_id,
                        record.model_version,
                        record.vector.len() as i64,
                        encode_vector(&record.vector),
                        record.content_hash,
                        record.published_at,
                        now,
                    ])?;
                }
            }
            tx.commit().map_err(StoreError::from)?;
        }

        // Group the snapshot changes per model version, including removals
        // from versions an article is moving away from
        let mut upserts: HashMap<String, Vec<IndexRow>> = HashMap::new();
        let mut removals: HashMap<String, Vec<String>> = HashMap::new();
        for record in latest.values() {
            for (version, snapshot) in current.iter() {
                if *version != record.model_version && snapshot.contains(&record.article_id) {
                    removals
                        .entry(version.clone())
                        .or_default()
                        .push(record.article_id.clone());
                }
            }
            upserts
                .entry(record.model_version.clone())
                .or_default()
                .push(IndexRow {
                    article_id: record.article_id.clone(),
                    published_at: record.published_at,
                    vector: record.vector.clone(),
                });
        }

        let mut next = current.clone();
        let mut touched: Vec<&String> = upserts.keys().chain(removals.keys()).collect();
        touched.sort();
        touched.dedup();
        for version in touched {
            let rows = upserts.get(version).map(Vec::as_slice).unwrap_or(&[]);
            let deletes = removals.get(version).map(Vec::as_slice).unwrap_or(&[]);
            let dim = dims.get(version.as_str()).copied().unwrap_or_else(|| {
                current.get(version).map(|s| s.dimension()).unwrap_or(0)
            });
            let base = current
                .get(version)
                .cloned()
                .unwrap_or_else(|| Arc::new(IndexSnapshot::empty(version.clone(), dim)));
            let updated = base.with_changes(rows, deletes);
            if updated.is_empty() {
                next.remove(version);
            } else {
                next.insert(version.clone(), Arc::new(updated));
            }
        }
        self.replace_snapshots(next)?;

        debug!("Upserted {} vectors", latest.len());
        Ok(latest.len())
    }

    /// The `k` most similar articles to `vector` among records of `model_version`
    ///
    /// Ordered by descending cosine similarity; ties go to the newer article,
    /// then the smaller article id. Returns every record when fewer than `k`
    /// exist, and an empty list when the store holds no vectors at all.
    pub fn query_nearest(
        &self,
        vector: &[f32],
        k: usize,
        model_version: &str,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(AstroError::input("k must be greater than 0"));
        }

        let snapshot = match self.snapshot(model_version)? {
            Some(snapshot) => snapshot,
            None => {
                let indexed = self.model_versions()?;
                return match indexed.into_iter().next() {
                    Some((other, _)) => Err(AstroError::Consistency {
                        indexed: other,
                        requested: model_version.to_string(),
                    }),
                    None => Ok(Vec::new()),
                };
            }
        };

        if vector.len() != snapshot.dimension() {
            return Err(AstroError::Consistency {
                indexed: format!("{} ({}D)", model_version, snapshot.dimension()),
                requested: format!("{} ({}D)", model_version, vector.len()),
            });
        }

        let query = l2_normalize(vector.to_vec())
            .ok_or_else(|| AstroError::input("query vector is zero or not finite"))?;

        Ok(snapshot.nearest(&query, k))
    }

    /// Remove an article's vector; `false` when it had none
    pub fn delete(&self, article_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let removed = {
            let conn = self.db.get_conn()?;
            conn.execute(
                "DELETE FROM embeddings WHERE article_id = ?1",
                params![article_id],
            )?
        };
        if removed == 0 {
            return Ok(false);
        }

        let mut next = self.read_snapshots()?;
        let holders: Vec<String> = next
            .iter()
            .filter(|(_, s)| s.contains(article_id))
            .map(|(v, _)| v.clone())
            .collect();
        for version in holders {
            if let Some(snapshot) = next.get(&version).cloned() {
                let updated = snapshot.with_changes(&[], &[article_id.to_string()]);
                if updated.is_empty() {
                    next.remove(&version);
                } else {
                    next.insert(version, Arc::new(updated));
                }
            }
        }
        self.replace_snapshots(next)?;

        debug!("Deleted vector for {}", article_id);
        Ok(true)
    }

    /// Move the tie-break date of already-indexed vectors
    ///
    /// Vectors are left as they are. Ids without a stored vector are ignored.
    /// Returns the number of records changed.
    pub fn set_published_at(&self, dates: &[(String, i64)]) -> Result<usize> {
        if dates.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut changed = 0;
        {
            let mut conn = self.db.get_conn()?;
            let tx = conn.transaction().map_err(StoreError::from)?;
            {
                let mut stmt =
                    tx.prepare("UPDATE embeddings SET published_at = ?2 WHERE article_id = ?1")?;
                for (article_id, published_at) in dates {
                    changed += stmt.execute(params![article_id, published_at])?;
                }
            }
            tx.commit().map_err(StoreError::from)?;
        }

        let mut next = self.read_snapshots()?;
        for snapshot in next.values_mut() {
            let rows: Vec<IndexRow> = dates
                .iter()
                .filter_map(|(article_id, published_at)| {
                    snapshot.vector(article_id).map(|v| IndexRow {
                        article_id: article_id.clone(),
                        published_at: *published_at,
                        vector: v.to_vec(),
                    })
                })
                .collect();
            if !rows.is_empty() {
                *snapshot = Arc::new(snapshot.with_changes(&rows, &[]));
            }
        }
        self.replace_snapshots(next)?;

        debug!("Re-dated {} vectors", changed);
        Ok(changed)
    }

    /// Every (article_id, vector) of `model_version`, in article-id order
    pub fn all_vectors(&self, model_version: &str) -> Result<Vec<(String, Vec<f32>)>> {
        Ok(self
            .snapshot(model_version)?
            .map(|s| s.rows().map(|r| (r.article_id, r.vector)).collect())
            .unwrap_or_default())
    }

    /// Point-in-time view of one model version's index
    pub fn snapshot(&self, model_version: &str) -> Result<Option<Arc<IndexSnapshot>>> {
        let snapshots = self.snapshots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(snapshots.get(model_version).cloned())
    }

    /// Persisted record for one article, if any
    pub fn get(&self, article_id: &str) -> Result<Option<EmbeddingRecord>> {
        let conn = self.db.get_conn()?;
        let row = conn
            .query_row(
                "SELECT model_version, dim, vector, content_hash, created_at
                 FROM embeddings WHERE article_id = ?1",
                params![article_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((model_version, dim, blob, content_hash, created_at)) => {
                Ok(Some(EmbeddingRecord {
                    article_id: article_id.to_string(),
                    vector: decode_vector(&blob, dim as usize)?,
                    model_version,
                    content_hash,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// [`Fingerprint`] for each of `article_ids` that has a record
    pub fn fingerprints(&self, article_ids: &[String]) -> Result<HashMap<String, Fingerprint>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT model_version, content_hash, published_at FROM embeddings WHERE article_id = ?1",
        )?;

        let mut out = HashMap::new();
        for id in article_ids {
            let found = stmt
                .query_row(params![id], |row| {
                    Ok(Fingerprint {
                        model_version: row.get(0)?,
                        content_hash: row.get(1)?,
                        published_at: row.get(2)?,
                    })
                })
                .optional()?;
            if let Some(fingerprint) = found {
                out.insert(id.clone(), fingerprint);
            }
        }
        Ok(out)
    }

    /// Article ids whose current vector was not produced by `model_version`
    pub fn ids_not_in_version(&self, model_version: &str) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT article_id FROM embeddings WHERE model_version != ?1 ORDER BY article_id",
        )?;
        let ids = stmt
            .query_map(params![model_version], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn count(&self, model_version: &str) -> Result<usize> {
        Ok(self.snapshot(model_version)?.map(|s| s.len()).unwrap_or(0))
    }

    /// Indexed model versions with their vector counts, largest first
    pub fn model_versions(&self) -> Result<Vec<(String, usize)>> {
        let snapshots = self.snapshots.read().map_err(|_| StoreError::Poisoned)?;
        let mut versions: Vec<(String, usize)> = snapshots
            .iter()
            .map(|(v, s)| (v.clone(), s.len()))
            .collect();
        versions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(versions)
    }

    pub fn total_count(&self) -> Result<usize> {
        Ok(self.model_versions()?.iter().map(|(_, n)| n).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.total_count()? == 0)
    }

    fn read_snapshots(&self) -> Result<HashMap<String, Arc<IndexSnapshot>>> {
        Ok(self
            .snapshots
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .clone())
    }

    fn replace_snapshots(&self, next: HashMap<String, Arc<IndexSnapshot>>) -> Result<()> {
        *self.snapshots.write().map_err(|_| StoreError::Poisoned)? = next;
        Ok(())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dim: usize) -> std::result::Result<Vec<f32>, StoreError> {
    if blob.len() != dim * 4 {
        return Err(StoreError::Corrupt(format!(
            "vector blob has {} bytes, expected {}",
            blob.len(),
            dim * 4
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (VectorStore, Arc<Database>, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("db.sqlite")).unwrap());
        let store = VectorStore::open(db.clone()).unwrap();
        (store, db, temp)
    }

    fn record(id: &str, vector: Vec<f32>, model: &str, published_at: i64) -> VectorRecord {
        VectorRecord {
            article_id: id.to_string(),
            vector,
            model_version: model.to_string(),
            content_hash: format!("hash-{}", id),
            published_at,
        }
    }

    #[test]
    fn test_upsert_then_query_returns_itself() {
        let (store, _db, _temp) = open_store();
        let v = vec![0.2, 0.4, 0.4, 0.8];
        store.upsert(record("a", v.clone(), "m1", 10)).unwrap();
        store.upsert(record("b", vec![1.0, 0.0, 0.0, 0.0], "m1", 10)).unwrap();

        let hits = store.query_nearest(&v, 1, "m1").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].article_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_upsert_replaces_existing_vector() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();
        store.upsert(record("a", vec![0.0, 1.0], "m1", 0)).unwrap();

        assert_eq!(store.count("m1").unwrap(), 1);
        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored.vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_model_upgrade_supersedes_old_vector() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "old", 0)).unwrap();
        store.upsert(record("b", vec![0.0, 1.0], "old", 0)).unwrap();
        store.upsert(record("a", vec![1.0, 0.0, 0.0], "new", 0)).unwrap();

        assert_eq!(store.count("old").unwrap(), 1);
        assert_eq!(store.count("new").unwrap(), 1);
        let hits = store.query_nearest(&[1.0, 0.0], 5, "old").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].article_id, "b");
        assert_eq!(store.ids_not_in_version("new").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_query_unknown_version_is_consistency_error() {
        let (store, _db, _temp) = open_store();
        assert!(store.query_nearest(&[1.0, 0.0], 3, "m1").unwrap().is_empty());

        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();
        assert!(matches!(
            store.query_nearest(&[1.0, 0.0], 3, "m2"),
            Err(AstroError::Consistency { .. })
        ));
        assert!(matches!(
            store.query_nearest(&[1.0, 0.0, 0.0], 3, "m1"),
            Err(AstroError::Consistency { .. })
        ));
    }

    #[test]
    fn test_dimension_fixed_per_version() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();
        let result = store.upsert(record("b", vec![1.0, 0.0, 0.0], "m1", 0));
        assert!(matches!(result, Err(AstroError::Consistency { .. })));
        assert_eq!(store.count("m1").unwrap(), 1);
    }

    #[test]
    fn test_zero_vector_rejected() {
        let (store, _db, _temp) = open_store();
        let result = store.upsert(record("a", vec![0.0, 0.0], "m1", 0));
        assert!(matches!(result, Err(AstroError::Input(_))));
    }

    #[test]
    fn test_query_rejects_zero_k() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();
        assert!(matches!(
            store.query_nearest(&[1.0, 0.0], 0, "m1"),
            Err(AstroError::Input(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.is_empty().unwrap());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_reopen_restores_snapshots() {
        let (store, db, _temp) = open_store();
        store
            .bulk_upsert(vec![
                record("a", vec![1.0, 0.0], "m1", 5),
                record("b", vec![0.6, 0.8], "m1", 7),
            ])
            .unwrap();
        drop(store);

        let reopened = VectorStore::open(db).unwrap();
        assert_eq!(reopened.count("m1").unwrap(), 2);
        let all = reopened.all_vectors("m1").unwrap();
        assert_eq!(all[0].0, "a");
        assert_eq!(all[1].0, "b");
    }

    #[test]
    fn test_reader_snapshot_is_point_in_time() {
        let (store, _db, _temp) = open_store();
        store.upsert(record("a", vec![1.0, 0.0], "m1", 0)).unwrap();

        let before = store.snapshot("m1").unwrap().unwrap();
        store.upsert(record("b", vec![0.0, 1.0], "m1", 0)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot("m1").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_writers_keep_every_update() {
        let (store, _db, _temp) = open_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let angle = (t * 10 + i) as f32 * 0.05;
                        store
                            .upsert(record(
                                &format!("t{}-{}", t, i),
                                vec![angle.cos(), angle.sin()],
                                "m1",
                                0,
                            ))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count("m1").unwrap(), 40);
    }

    #[test]
    fn test_set_published_at_moves_tie_break() {
        let (store, db, _temp) = open_store();
        store
            .bulk_upsert(vec![
                record("a", vec![1.0, 0.0], "m1", 100),
                record("b", vec![1.0, 0.0], "m1", 200),
            ])
            .unwrap();
        let hits = store.query_nearest(&[1.0, 0.0], 2, "m1").unwrap();
        assert_eq!(hits[0].article_id, "b");

        let changed = store
            .set_published_at(&[("a".to_string(), 300), ("missing".to_string(), 1)])
            .unwrap();
        assert_eq!(changed, 1);

        let hits = store.query_nearest(&[1.0, 0.0], 2, "m1").unwrap();
        assert_eq!(hits[0].article_id, "a");
        assert_eq!(hits[0].published_at, 300);
        let fingerprints = store.fingerprints(&["a".to_string()]).unwrap();
        assert_eq!(fingerprints["a"].published_at, 300);

        // Survives a reload from disk
        drop(store);
        let reopened = VectorStore::open(db).unwrap();
        let hits = reopened.query_nearest(&[1.0, 0.0], 2, "m1").unwrap();
        assert_eq!(hits[0].article_id, "a");
    }

    #[test]
    fn test_vector_codec() {
        let v = vec![0.25, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v), 3).unwrap(), v);
        assert!(decode_vector(&[0, 1, 2], 1).is_err());
    }
}
