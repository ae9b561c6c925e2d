//! In-memory citation store
//!
//! Behaves like the Redis store for the operations the build uses, and can
//! be told to fail so that partial loads and retries can be exercised.

use super::CitationStore;
use crate::db::models::{CitationEntry, Pmid};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// In-memory citation store
#[derive(Default)]
pub struct MemoryCitationStore {
    sets: RwLock<HashMap<String, HashSet<Pmid>>>,
    version: RwLock<Option<String>>,
    sadd_commands: AtomicU64,
    add_calls: AtomicU64,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    /// Fail every `add_citations` call once this many have succeeded
    fail_add_after: Option<u64>,
    /// Whether those `add_citations` failures look like a dropped connection
    add_failures_transient: bool,
    /// Transient failures left to inject into read operations
    transient_read_failures: u32,
    /// Fail every read of this CURIE permanently
    poisoned_curie: Option<String>,
}

impl MemoryCitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate citation sets without counting them as SADD traffic
    pub fn with_sets<I, S>(sets: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<Pmid>)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.sets.write().unwrap_or_else(|e| e.into_inner());
            for (curie, pmids) in sets {
                if !pmids.is_empty() {
                    map.insert(curie.into(), pmids.into_iter().collect());
                }
            }
        }
        store
    }

    /// Make `add_citations` fail after `calls` successful calls
    pub fn fail_add_after(&self, calls: u64) {
        let mut faults = self.faults();
        faults.fail_add_after = Some(calls);
        faults.add_failures_transient = false;
    }

    /// Like [`fail_add_after`](Self::fail_add_after), with a transient error
    pub fn fail_add_transiently_after(&self, calls: u64) {
        let mut faults = self.faults();
        faults.fail_add_after = Some(calls);
        faults.add_failures_transient = true;
    }

    /// Make the next `count` reads fail with a transient error
    pub fn fail_reads_transiently(&self, count: u32) {
        self.faults().transient_read_failures = count;
    }

    /// Make every read touching `curie` fail permanently
    pub fn poison(&self, curie: &str) {
        self.faults().poisoned_curie = Some(curie.to_string());
    }

    /// Total SADD commands received
    pub fn sadd_commands(&self) -> u64 {
        self.sadd_commands.load(Ordering::SeqCst)
    }

    /// Number of citation sets currently stored
    pub fn len(&self) -> usize {
        self.sets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_read(&self, curies: &[&str]) -> Result<()> {
        let mut faults = self.faults();
        if let Some(poisoned) = &faults.poisoned_curie {
            if curies.contains(&poisoned.as_str()) {
                return Err(AppError::Cache {
                    message: format!("WRONGTYPE Operation against key {poisoned}"),
                    transient: false,
                });
            }
        }
        if faults.transient_read_failures > 0 {
            faults.transient_read_failures -= 1;
            return Err(AppError::Cache {
                message: "connection reset by peer".to_string(),
                transient: true,
            });
        }
        Ok(())
    }

    fn set_len(&self, curie: &str) -> u64 {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        sets.get(curie).map_or(0, |s| s.len() as u64)
    }
}

#[async_trait]
impl CitationStore for MemoryCitationStore {
    async fn version(&self) -> Result<Option<String>> {
        Ok(self.version.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn set_version(&self, version: &str) -> Result<()> {
        *self.version.write().unwrap_or_else(|e| e.into_inner()) = Some(version.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.sets.write().unwrap_or_else(|e| e.into_inner()).clear();
        *self.version.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn add_citations(&self, entries: &[CitationEntry]) -> Result<()> {
        let calls = self.add_calls.fetch_add(1, Ordering::SeqCst);
        let faults = self.faults();
        if faults.fail_add_after.is_some_and(|limit| calls >= limit) {
            let message = if faults.add_failures_transient {
                "Connection reset by peer"
            } else {
                "MISCONF Redis is configured to save RDB snapshots"
            };
            return Err(AppError::Cache {
                message: message.to_string(),
                transient: faults.add_failures_transient,
            });
        }
        drop(faults);

        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        for entry in entries.iter().filter(|e| !e.pmids.is_empty()) {
            sets.entry(entry.curie.clone())
                .or_default()
                .extend(entry.pmids.iter().copied());
            self.sadd_commands.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn cardinality(&self, curie: &str) -> Result<u64> {
        self.check_read(&[curie])?;
        Ok(self.set_len(curie))
    }

    async fn intersection_cardinality(&self, curie_a: &str, curie_b: &str) -> Result<u64> {
        self.check_read(&[curie_a, curie_b])?;
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        let count = match (sets.get(curie_a), sets.get(curie_b)) {
            (Some(a), Some(b)) => a.intersection(b).count() as u64,
            _ => 0,
        };
        Ok(count)
    }
}
