//! Database layer for the CURIE NGD build
//!
//! Provides:
//! - Read-only access to the `curie_to_pmids` snapshot
//! - The `curie_ngd` output store with batched, insert-once writes
//! - SQLite pool setup for both

pub mod models;
mod repository;
mod snapshot;

pub use repository::NgdRepository;
pub use snapshot::{SnapshotReader, SnapshotRow};

#[cfg(any(test, feature = "test-utils"))]
pub use snapshot::fixtures as snapshot_fixtures;

use crate::errors::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Seconds to wait for a pooled SQLite connection
const ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Open an existing snapshot database read-only
pub async fn open_snapshot(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        return Err(AppError::SnapshotUnavailable {
            path: path.display().to_string(),
            message: "file does not exist".to_string(),
        });
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options)
        .await
        .map_err(|e| AppError::SnapshotUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    info!(path = %path.display(), "Snapshot database opened");
    Ok(pool)
}

/// Open (creating if needed) the output database
///
/// WAL mode lets resumability checks read while the writer commits.
pub async fn open_output(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options)
        .await?;

    info!(path = %path.display(), "Output database opened");
    Ok(pool)
}
