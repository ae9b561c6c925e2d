//! Versioned citation cache loader
//!
//! Replaces the cache contents with a snapshot's CURIE → PMID sets. The
//! version marker is written last, and only when every row made it into the
//! store; a failed load leaves the marker unset.

use crate::errors::BuildError;
use curie_ngd_common::db::models::{decode_pmids, CitationEntry};
use curie_ngd_common::db::{SnapshotReader, SnapshotRow};
use curie_ngd_common::{metrics, AppError, CitationStore, RetryPolicy};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument};

/// Result of [`CacheLoader::ensure_cache_version`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The marker already matched; nothing was written
    AlreadyCurrent,
    /// The cache was flushed and reloaded
    Loaded { rows: u64 },
}

/// Bulk loader for the citation cache
pub struct CacheLoader {
    store: Arc<dyn CitationStore>,
    retry: RetryPolicy,
    batch_size: usize,
    pipeline_size: usize,
}

impl CacheLoader {
    pub fn new(
        store: Arc<dyn CitationStore>,
        retry: RetryPolicy,
        batch_size: usize,
        pipeline_size: usize,
    ) -> Self {
        Self {
            store,
            retry,
            batch_size: batch_size.max(1),
            pipeline_size: pipeline_size.max(1),
        }
    }

    /// Make the cache hold exactly `snapshot` under marker `version`
    #[instrument(skip(self, snapshot))]
    pub async fn ensure_cache_version(
        &self,
        snapshot: SqlitePool,
        version: &str,
    ) -> Result<LoadOutcome, BuildError> {
        let current = self
            .retry
            .run("GET version", || self.store.version())
            .await
            .map_err(|source| BuildError::CacheLoad { offset: 0, source })?;

        if current.as_deref() == Some(version) {
            info!("Citation cache already holds this version, skipping load");
            return Ok(LoadOutcome::AlreadyCurrent);
        }

        // Read the snapshot before touching the cache, so an unreadable
        // snapshot aborts the build with the old cache intact.
        let mut reader = SnapshotReader::new(snapshot, self.batch_size);
        let total = reader.count().await.map_err(|e| BuildError::CacheLoad {
            offset: 0,
            source: AppError::SnapshotUnavailable {
                path: "curie_to_pmids".to_string(),
                message: e.to_string(),
            },
        })?;

        info!(current = ?current, total, "Citation cache is stale, reloading");

        self.retry
            .run("FLUSHDB", || self.store.flush())
            .await
            .map_err(|source| BuildError::CacheLoad { offset: 0, source })?;

        loop {
            let offset = reader.offset();
            let batch = reader
                .next_batch()
                .await
                .map_err(|source| BuildError::CacheLoad { offset, source })?;
            let Some(rows) = batch else { break };

            let entries = decode_batch(offset, rows)?;
            for (index, chunk) in entries.chunks(self.pipeline_size).enumerate() {
                self.retry
                    .run("SADD pipeline", || self.store.add_citations(chunk))
                    .await
                    .map_err(|source| BuildError::CacheLoad {
                        offset: offset + (index * self.pipeline_size) as u64,
                        source,
                    })?;
            }

            let loaded = reader.offset();
            metrics::record_rows_loaded(entries.len(), total);
            info!(loaded, total, "Loaded snapshot batch");
        }

        let rows = reader.offset();

        // Every SADD above has been awaited; only now may the marker claim
        // the cache is complete.
        self.retry
            .run("SET version", || self.store.set_version(version))
            .await
            .map_err(|source| BuildError::CacheLoad { offset: rows, source })?;

        info!(rows, "Citation cache loaded");
        Ok(LoadOutcome::Loaded { rows })
    }
}

/// Decode a page of snapshot rows, failing on the first malformed list
fn decode_batch(offset: u64, rows: Vec<SnapshotRow>) -> Result<Vec<CitationEntry>, BuildError> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let pmids = decode_pmids(&row.curie, &row.pmids).map_err(|source| BuildError::CacheLoad {
                offset: offset + index as u64,
                source,
            })?;
            Ok(CitationEntry {
                curie: row.curie,
                pmids,
            })
        })
        .collect()
}
