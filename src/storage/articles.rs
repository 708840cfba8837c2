//! Article rows and their cached summaries

use super::{unix_now, Database, StoreError};
use crate::corpus::Article;
use crate::error::Result;
use chrono::DateTime;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

/// Whether an upsert created, changed or left an article untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
    Unchanged,
}

pub struct ArticleStore {
    db: Arc<Database>,
}

impl ArticleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace an article
    ///
    /// A cached summary is dropped when the title or body changes.
    pub fn upsert(&self, article: &Article) -> Result<UpsertKind> {
        let conn = self.db.get_conn()?;

        let existing = conn
            .query_row(
                "SELECT title, body, published_at, source_url, source FROM articles WHERE id = ?1",
                params![article.id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let published_at = article.published_at.timestamp();
        let kind = match existing {
            None => UpsertKind::Inserted,
            Some((title, body, ts, url, source))
                if title == article.title
                    && body == article.body
                    && ts == published_at
                    && url == article.source_url
                    && source == article.source =>
            {
                return Ok(UpsertKind::Unchanged);
            }
            Some(_) => UpsertKind::Updated,
        };

        conn.execute(
            "INSERT INTO articles
                (id, title, body, published_at, source_url, source, summary, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)
             ON CONFLICT(id) DO UPDATE SET
                summary = CASE
                    WHEN articles.title = excluded.title AND articles.body = excluded.body
                    THEN articles.summary ELSE NULL END,
                title = excluded.title,
                body = excluded.body,
                published_at = excluded.published_at,
                source_url = excluded.source_url,
                source = excluded.source,
                ingested_at = excluded.ingested_at",
            params![
                article.id,
                article.title,
                article.body,
                published_at,
                article.source_url,
                article.source,
                unix_now(),
            ],
        )?;

        Ok(kind)
    }

    pub fn get(&self, id: &str) -> Result<Option<Article>> {
        let conn = self.db.get_conn()?;
        let row = conn
            .query_row(
                "SELECT id, title, body, published_at, source_url, source FROM articles WHERE id = ?1",
                params![id],
                raw_row,
            )
            .optional()?;
        row.map(into_article).transpose()
    }

    /// Articles for `ids`, in the same order; unknown ids are skipped
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Article>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, body, published_at, source_url, source FROM articles WHERE id = ?1",
        )?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = stmt.query_row(params![id], raw_row).optional()? {
                out.push(into_article(row)?);
            }
        }
        Ok(out)
    }

    /// Every article, ordered by id
    pub fn all(&self) -> Result<Vec<Article>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, body, published_at, source_url, source FROM articles ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_article).collect()
    }

    pub fn summary(&self, id: &str) -> Result<Option<String>> {
        let conn = self.db.get_conn()?;
        let summary = conn
            .query_row(
                "SELECT summary FROM articles WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(summary.flatten())
    }

    /// Cache a summary; `false` when the article does not exist
    pub fn set_summary(&self, id: &str, summary: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let updated = conn.execute(
            "UPDATE articles SET summary = ?2 WHERE id = ?1",
            params![id, summary],
        )?;
        Ok(updated > 0)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let removed = conn.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.db.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

type RawRow = (String, String, String, i64, String, Option<String>);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_article((id, title, body, published_at, source_url, source): RawRow) -> Result<Article> {
    let published_at = DateTime::from_timestamp(published_at, 0).ok_or_else(|| {
        StoreError::Corrupt(format!("article {} has timestamp {}", id, published_at))
    })?;
    Ok(Article {
        id,
        title,
        body,
        published_at,
        source_url,
        source,
    })
}
