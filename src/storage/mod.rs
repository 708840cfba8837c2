//! Storage layer for AstroNews
//!
//! SQLite is the durable source of truth. Vector reads are served from
//! in-memory snapshots that are rebuilt copy-on-write after every commit.

pub mod articles;
pub mod clusters;
pub mod database;
mod snapshot;
pub mod vector_store;

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use articles::{ArticleStore, UpsertKind};
pub use clusters::{ClusterRunSummary, ClusterStore};
pub use database::{Database, DbPool, DbStats};
pub use snapshot::{IndexRow, IndexSnapshot, Neighbor};
pub use vector_store::{EmbeddingRecord, Fingerprint, VectorRecord, VectorStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Opened storage: database plus the stores layered over it
pub struct Storage {
    pub database: Arc<Database>,
    pub articles: Arc<ArticleStore>,
    pub vectors: Arc<VectorStore>,
    pub clusters: Arc<ClusterStore>,
}

impl Storage {
    /// Open the database at `db_path` and load the vector snapshots
    pub fn open(db_path: &Path) -> Result<Self> {
        let database = Arc::new(Database::new(db_path)?);
        let vectors = Arc::new(VectorStore::open(database.clone())?);

        Ok(Self {
            articles: Arc::new(ArticleStore::new(database.clone())),
            clusters: Arc::new(ClusterStore::new(database.clone())),
            vectors,
            database,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.database.ping()
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.database.stats()
    }
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
