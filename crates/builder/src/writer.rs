//! Batched result writer
//!
//! The only component that writes to the output store. Records are buffered
//! and committed `batch_size` at a time in one transaction each, so a crash
//! loses at most the uncommitted buffer.

use crate::errors::BuildError;
use curie_ngd_common::db::NgdRepository;
use curie_ngd_common::{metrics, NgdRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ResultWriter {
    repository: NgdRepository,
    batch_size: usize,
    buffer: Vec<NgdRecord>,
    committed: u64,
}

impl ResultWriter {
    pub fn new(repository: NgdRepository, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            repository,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            committed: 0,
        }
    }

    pub async fn has_record(&self, curie_a: &str, curie_b: &str) -> Result<bool, BuildError> {
        self.repository
            .has_record(curie_a, curie_b)
            .await
            .map_err(|source| BuildError::Write {
                committed: self.committed,
                source,
            })
    }

    /// Buffer a record, committing once the buffer is full
    pub async fn append(&mut self, record: NgdRecord) -> Result<(), BuildError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit whatever is buffered
    pub async fn flush(&mut self) -> Result<(), BuildError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let inserted = self
            .repository
            .insert_batch(&self.buffer)
            .await
            .map_err(|source| BuildError::Write {
                committed: self.committed,
                source,
            })?;

        if inserted < self.buffer.len() as u64 {
            debug!(
                batch = self.buffer.len(),
                inserted, "Some records were already present and kept as-is"
            );
        }

        metrics::record_commit(self.buffer.len());
        self.committed += inserted;
        self.buffer.clear();
        Ok(())
    }

    /// Flush the remainder and return the number of records committed
    pub async fn finish(mut self) -> Result<u64, BuildError> {
        self.flush().await?;
        info!(committed = self.committed, "Result writer finished");
        Ok(self.committed)
    }

    /// Run the writer on its own task, fed by a bounded channel
    ///
    /// The task drains the channel until every sender is dropped, then
    /// flushes. On a write failure it stops receiving, which closes the
    /// channel for the producers.
    pub fn spawn(
        mut self,
        capacity: usize,
    ) -> (mpsc::Sender<NgdRecord>, JoinHandle<Result<u64, BuildError>>) {
        let (tx, mut rx) = mpsc::channel::<NgdRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = self.append(record).await {
                    warn!(error = %e, "Result writer failed, closing channel");
                    rx.close();
                    return Err(e);
                }
            }
            self.finish().await
        });

        (tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curie_ngd_common::db::open_output;
    use curie_ngd_common::{ConceptPair, NgdScore};
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    async fn repository(dir: &TempDir) -> NgdRepository {
        let pool = open_output(&dir.path().join("curie_ngd.sqlite")).await.unwrap();
        NgdRepository::new(pool).await.unwrap()
    }

    fn record(a: &str, b: &str, ngd: NgdScore) -> NgdRecord {
        NgdRecord::new(&ConceptPair::new(a, b), ngd, 3, 4, 2)
    }

    #[tokio::test]
    async fn test_commits_in_batches() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let mut writer = ResultWriter::new(repo.clone(), 2);

        assert_ok!(writer.append(record("A:1", "B:1", NgdScore::Value(0.5))).await);
        assert_eq!(repo.count().await.unwrap(), 0);

        assert_ok!(writer.append(record("A:1", "B:2", NgdScore::MaxDistance)).await);
        assert_eq!(repo.count().await.unwrap(), 2);

        writer.append(record("A:1", "B:3", NgdScore::Undefined)).await.unwrap();
        assert!(!writer.has_record("A:1", "B:3").await.unwrap());

        assert_eq!(writer.finish().await.unwrap(), 3);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_existing_rows_are_never_rewritten() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;

        let mut writer = ResultWriter::new(repo.clone(), 10);
        writer.append(record("A:1", "B:1", NgdScore::Value(0.25))).await.unwrap();
        writer.finish().await.unwrap();

        let mut writer = ResultWriter::new(repo.clone(), 10);
        assert!(writer.has_record("A:1", "B:1").await.unwrap());
        writer.append(record("A:1", "B:1", NgdScore::Value(0.75))).await.unwrap();
        writer.append(record("A:1", "B:2", NgdScore::Value(0.5))).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 1);

        let stored = repo.get_record("A:1", "B:1").await.unwrap().unwrap();
        assert_eq!(stored.ngd, NgdScore::Value(0.25));
    }

    #[tokio::test]
    async fn test_spawned_writer_drains_channel() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let (tx, handle) = ResultWriter::new(repo.clone(), 3).spawn(4);

        for i in 0..10 {
            tx.send(record("A:1", &format!("B:{i}"), NgdScore::Value(0.1)))
                .await
                .unwrap();
        }
        drop(tx);

        assert_eq!(handle.await.unwrap().unwrap(), 10);
        assert_eq!(repo.count().await.unwrap(), 10);
    }
}
