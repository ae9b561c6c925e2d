//! Repository for the `curie_ngd` output store
//!
//! Rows are insert-once: a batch commits in a single transaction and
//! conflicting rows are ignored, so a committed record is never rewritten.

use crate::db::models::{NgdRecord, NgdScore};
use crate::errors::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS curie_ngd (
    curie_a TEXT NOT NULL,
    curie_b TEXT NOT NULL,
    ngd REAL,
    count_a INTEGER NOT NULL,
    count_b INTEGER NOT NULL,
    intersection INTEGER NOT NULL,
    UNIQUE (curie_a, curie_b)
)";

/// Repository for NGD output rows
#[derive(Clone)]
pub struct NgdRepository {
    pool: SqlitePool,
}

impl NgdRepository {
    /// Create a repository, creating the output table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Commit a batch of records atomically
    ///
    /// Returns the number of rows actually inserted; rows that already exist
    /// are left untouched.
    pub async fn insert_batch(&self, records: &[NgdRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO curie_ngd (curie_a, curie_b, ngd, count_a, count_b, intersection)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.curie_a)
            .bind(&record.curie_b)
            .bind(record.ngd.to_column())
            .bind(to_sql_int(record.count_a))
            .bind(to_sql_int(record.count_b))
            .bind(to_sql_int(record.intersection))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(batch = records.len(), inserted, "Committed NGD batch");
        Ok(inserted)
    }

    /// Check whether a pair already has a committed row, in either order
    pub async fn has_record(&self, curie_a: &str, curie_b: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM curie_ngd
             WHERE (curie_a = ? AND curie_b = ?) OR (curie_a = ? AND curie_b = ?)
             LIMIT 1",
        )
        .bind(curie_a)
        .bind(curie_b)
        .bind(curie_b)
        .bind(curie_a)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Fetch a committed row
    pub async fn get_record(&self, curie_a: &str, curie_b: &str) -> Result<Option<NgdRecord>> {
        let row = sqlx::query(
            "SELECT curie_a, curie_b, ngd, count_a, count_b, intersection
             FROM curie_ngd WHERE curie_a = ? AND curie_b = ?",
        )
        .bind(curie_a)
        .bind(curie_b)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(NgdRecord {
                curie_a: row.try_get("curie_a")?,
                curie_b: row.try_get("curie_b")?,
                ngd: NgdScore::from_column(row.try_get("ngd")?),
                count_a: from_sql_int(row.try_get("count_a")?),
                count_b: from_sql_int(row.try_get("count_b")?),
                intersection: from_sql_int(row.try_get("intersection")?),
            })
        })
        .transpose()
    }

    /// Number of committed rows
    pub async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curie_ngd")
            .fetch_one(&self.pool)
            .await?;
        Ok(from_sql_int(total))
    }

    /// Close the pool, checkpointing the WAL into the main database file
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// SQLite integers are signed; citation counts never approach i64::MAX.
fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
