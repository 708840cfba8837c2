//! SQLite database management with migrations
//!
//! Provides structured storage for articles, embeddings, and cluster runs

use super::StoreError;
use crate::error::{AstroError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled connection handle
pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AstroError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Every pooled connection gets the same pragmas
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(StoreError::from)?;

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get().map_err(StoreError::from)?)
    }

    /// Cheap liveness check
    pub fn ping(&self) -> bool {
        self.get_conn()
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .is_ok()
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let article_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;

        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        let cluster_run_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM cluster_runs", [], |row| row.get(0))?;

        let summary_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE summary IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            article_count: article_count as usize,
            embedding_count: embedding_count as usize,
            cluster_run_count: cluster_run_count as usize,
            summary_count: summary_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub article_count: usize,
    pub embedding_count: usize,
    pub cluster_run_count: usize,
    pub summary_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Articles table (raw corpus plus derived summary)
    CREATE TABLE articles (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        published_at INTEGER NOT NULL,
        source_url TEXT NOT NULL,
        summary TEXT,
        ingested_at INTEGER NOT NULL
    );

    CREATE INDEX idx_articles_published_at ON articles(published_at);

    -- Embeddings table: exactly one current vector per article
    CREATE TABLE embeddings (
        article_id TEXT PRIMARY KEY,
        model_version TEXT NOT NULL,
        dim INTEGER NOT NULL,
        vector BLOB NOT NULL,
        content_hash TEXT NOT NULL,
        published_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model_version);

    -- Clustering runs, committed atomically with their assignments
    CREATE TABLE cluster_runs (
        run_id TEXT PRIMARY KEY,
        model_version TEXT NOT NULL,
        k_requested INTEGER NOT NULL,
        k_effective INTEGER NOT NULL,
        iterations INTEGER NOT NULL,
        converged BOOLEAN NOT NULL,
        inertia REAL NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_cluster_runs_created_at ON cluster_runs(created_at);

    CREATE TABLE cluster_assignments (
        run_id TEXT NOT NULL,
        article_id TEXT NOT NULL,
        cluster_id INTEGER NOT NULL,
        distance_to_centroid REAL NOT NULL,
        PRIMARY KEY (run_id, article_id),
        FOREIGN KEY (run_id) REFERENCES cluster_runs(run_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_cluster_assignments_article ON cluster_assignments(article_id);

    -- Nearest-to-centroid article per cluster, for re-anchoring across runs
    CREATE TABLE cluster_exemplars (
        run_id TEXT NOT NULL,
        cluster_id INTEGER NOT NULL,
        article_id TEXT NOT NULL,
        title TEXT NOT NULL,
        size INTEGER NOT NULL,
        PRIMARY KEY (run_id, cluster_id),
        FOREIGN KEY (run_id) REFERENCES cluster_runs(run_id) ON DELETE CASCADE
    );
    "#,
    // Migration 2: Publisher name from the collector
    r#"
    ALTER TABLE articles ADD COLUMN source TEXT;
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store").join("test.db");

        let db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(db.ping());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        drop(Database::new(&db_path).unwrap());
        let db = Database::new(&db_path).unwrap();
        assert_eq!(db.stats().unwrap().article_count, 0);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let tables = vec![
            "articles",
            "embeddings",
            "cluster_runs",
            "cluster_assignments",
            "cluster_exemplars",
        ];

        for table in tables {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }
}
