//! Paged reader over the `curie_to_pmids` snapshot table

use crate::errors::Result;
use sqlx::{Row, SqlitePool};

/// Raw snapshot row, before the citation list is decoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRow {
    pub curie: String,
    pub pmids: String,
}

/// Streams the snapshot in bounded pages
///
/// Pages follow `rowid` so every row is visited exactly once regardless of
/// page size.
pub struct SnapshotReader {
    pool: SqlitePool,
    batch_size: usize,
    last_rowid: i64,
    offset: u64,
    exhausted: bool,
}

impl SnapshotReader {
    pub fn new(pool: SqlitePool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            last_rowid: i64::MIN,
            offset: 0,
            exhausted: false,
        }
    }

    /// Total number of rows in the snapshot
    pub async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curie_to_pmids")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Rows handed out so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fetch the next page, or `None` once the table is exhausted
    pub async fn next_batch(&mut self) -> Result<Option<Vec<SnapshotRow>>> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT rowid, curie, pmids FROM curie_to_pmids WHERE rowid > ? ORDER BY rowid LIMIT ?",
        )
        .bind(self.last_rowid)
        .bind(self.batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            self.last_rowid = row.try_get("rowid")?;
            batch.push(SnapshotRow {
                curie: row.try_get("curie")?,
                pmids: row.try_get("pmids")?,
            });
        }
        self.offset += batch.len() as u64;

        Ok(Some(batch))
    }
}

/// Snapshot databases for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures {
    use crate::errors::Result;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use std::path::Path;

    /// In-memory snapshot holding `rows`
    pub async fn in_memory(rows: &[(&str, &str)]) -> Result<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        fill(&pool, rows).await?;
        Ok(pool)
    }

    /// Write a snapshot file holding `rows` at `path`
    pub async fn write_file(path: &Path, rows: &[(&str, &str)]) -> Result<()> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        fill(&pool, rows).await?;
        pool.close().await;
        Ok(())
    }

    async fn fill(pool: &SqlitePool, rows: &[(&str, &str)]) -> Result<()> {
        sqlx::query("CREATE TABLE curie_to_pmids (curie TEXT PRIMARY KEY, pmids TEXT)")
            .execute(pool)
            .await?;
        for (curie, pmids) in rows {
            sqlx::query("INSERT INTO curie_to_pmids (curie, pmids) VALUES (?, ?)")
                .bind(curie)
                .bind(pmids)
                .execute(pool)
                .await?;
        }
        Ok(())
    }
}
