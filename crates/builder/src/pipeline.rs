//! Build orchestration
//!
//! Drives one build through Idle → CacheEnsuring → Computing → Finalized.
//! Any error moves the build to Failed; whatever the writer had committed
//! by then stays valid and is skipped by the next run.

use crate::errors::BuildError;
use crate::loader::{CacheLoader, LoadOutcome};
use crate::ngd::{NgdEngine, Normalizer};
use crate::writer::ResultWriter;
use chrono::{DateTime, Utc};
use curie_ngd_common::db::{open_output, open_snapshot, NgdRepository};
use curie_ngd_common::plover::validate_kg_version;
use curie_ngd_common::staging::output_artifact_name;
use curie_ngd_common::{
    metrics, AppConfig, AppError, ArtifactStager, CitationStore, ConceptPair, ConceptPairSource,
    ErrorCategory, RetryPolicy,
};
use futures::{stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Pairs between progress log lines
const PROGRESS_LOG_INTERVAL: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Idle,
    CacheEnsuring,
    Computing,
    Finalized,
    Failed,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Finalized | BuildState::Failed)
    }

    fn can_transition_to(self, next: BuildState) -> bool {
        match (self, next) {
            (BuildState::Idle, BuildState::CacheEnsuring)
            | (BuildState::CacheEnsuring, BuildState::Computing)
            | (BuildState::Computing, BuildState::Finalized) => true,
            (from, BuildState::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tunables for a build, resolved from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub pipeline_size: usize,
    pub workers: usize,
    pub commit_batch_size: usize,
    pub queue_capacity: usize,
    pub out_dir: PathBuf,
    pub publish: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.snapshot.batch_size,
            pipeline_size: config.snapshot.pipeline_size,
            workers: config.workers(),
            commit_batch_size: config.output.commit_batch_size,
            queue_capacity: config.output.queue_capacity,
            out_dir: config.output.out_dir.clone(),
            publish: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildProgress {
    pub pairs_total: u64,
    pub pairs_skipped: u64,
    pub pairs_computed: u64,
    pub records_committed: u64,
}

/// Outcome of a build, printed when the process exits
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub version: String,
    pub state: BuildState,
    #[serde(flatten)]
    pub progress: BuildProgress,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    /// Process exit code: 0 when finalized, the error category's code otherwise
    pub fn exit_code(&self) -> i32 {
        match (self.error_category, self.state) {
            (Some(category), _) => category.exit_code(),
            (None, BuildState::Finalized) => 0,
            (None, _) => ErrorCategory::Internal.exit_code(),
        }
    }
}

pub struct Orchestrator {
    settings: PipelineSettings,
    store: Arc<dyn CitationStore>,
    source: Arc<dyn ConceptPairSource>,
    stager: Arc<dyn ArtifactStager>,
    normalizer: Normalizer,
    retry: RetryPolicy,
    state: BuildState,
    progress: BuildProgress,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn CitationStore>,
        source: Arc<dyn ConceptPairSource>,
        stager: Arc<dyn ArtifactStager>,
        normalizer: Normalizer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            store,
            source,
            stager,
            normalizer,
            retry,
            state: BuildState::Idle,
            progress: BuildProgress::default(),
        }
    }

    /// Run a full build for `version`
    ///
    /// An orchestrator builds once. Running it again reports a failed build
    /// and leaves the finished state as it was.
    #[instrument(skip(self))]
    pub async fn run(&mut self, version: &str) -> BuildReport {
        let started_at = Utc::now();
        if self.state != BuildState::Idle {
            let e = BuildError::InvalidTransition {
                from: self.state,
                to: BuildState::CacheEnsuring,
            };
            warn!(error = %e, "Orchestrator already ran, refusing a second build");
            return self.report(version, BuildState::Failed, started_at, None, Some(e));
        }

        let result = self.execute(version).await;

        let (output_path, error) = match result {
            Ok(path) => {
                info!(
                    output = %path.display(),
                    computed = self.progress.pairs_computed,
                    skipped = self.progress.pairs_skipped,
                    committed = self.progress.records_committed,
                    "Build finalized"
                );
                (Some(path), None)
            }
            Err(e) => {
                if !self.state.is_terminal() {
                    self.state = BuildState::Failed;
                }
                error!(
                    error = %e,
                    category = %e.category(),
                    committed = self.progress.records_committed,
                    "Build failed"
                );
                (None, Some(e))
            }
        };

        self.report(version, self.state, started_at, output_path, error)
    }

    fn report(
        &self,
        version: &str,
        state: BuildState,
        started_at: DateTime<Utc>,
        output_path: Option<PathBuf>,
        error: Option<BuildError>,
    ) -> BuildReport {
        BuildReport {
            version: version.to_string(),
            state,
            progress: self.progress.clone(),
            output_path,
            error_category: error.as_ref().map(BuildError::category),
            error: error.map(|e| e.to_string()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute(&mut self, version: &str) -> Result<PathBuf, BuildError> {
        validate_kg_version(version).map_err(BuildError::Precondition)?;

        self.transition(BuildState::CacheEnsuring)?;
        self.check_kg_version(version).await?;

        let snapshot_path = self
            .stager
            .ensure_snapshot(version)
            .await
            .map_err(BuildError::Precondition)?;
        let snapshot = open_snapshot(&snapshot_path)
            .await
            .map_err(BuildError::Precondition)?;

        let loader = CacheLoader::new(
            Arc::clone(&self.store),
            self.retry.clone(),
            self.settings.batch_size,
            self.settings.pipeline_size,
        );
        let loaded = loader.ensure_cache_version(snapshot.clone(), version).await;
        snapshot.close().await;
        match loaded? {
            LoadOutcome::AlreadyCurrent => debug!("Citation cache reused"),
            LoadOutcome::Loaded { rows } => debug!(rows, "Citation cache rebuilt"),
        }

        self.confirm_cache_version(version).await?;
        self.transition(BuildState::Computing)?;

        let pairs = self
            .source
            .concept_pairs()
            .await
            .map_err(BuildError::PairSource)?;

        let output_path = self.settings.out_dir.join(output_artifact_name(version));
        let repository = self.open_repository(&output_path).await?;

        let writer = ResultWriter::new(repository.clone(), self.settings.commit_batch_size);
        let pending = self.pending_pairs(&writer, pairs).await?;
        self.compute(writer, pending).await?;
        repository.close().await;

        if self.settings.publish {
            self.stager
                .publish_output(version, &output_path)
                .await
                .map_err(|source| BuildError::Write {
                    committed: self.progress.records_committed,
                    source,
                })?;
        }

        self.transition(BuildState::Finalized)?;
        Ok(output_path)
    }

    fn transition(&mut self, next: BuildState) -> Result<(), BuildError> {
        if !self.state.can_transition_to(next) {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(from = ?self.state, to = ?next, "Build state changed");
        self.state = next;
        Ok(())
    }

    async fn check_kg_version(&self, version: &str) -> Result<(), BuildError> {
        let reported = self
            .source
            .kg_version()
            .await
            .map_err(BuildError::Precondition)?;

        match reported {
            None => Err(BuildError::Precondition(AppError::VersionUnavailable {
                message: "knowledge graph service did not report a KG2 version".to_string(),
            })),
            Some(reported) if reported != version => {
                Err(BuildError::Precondition(AppError::VersionMismatch {
                    expected: version.to_string(),
                    reported,
                }))
            }
            Some(_) => {
                info!("Knowledge graph version confirmed");
                Ok(())
            }
        }
    }

    async fn confirm_cache_version(&self, version: &str) -> Result<(), BuildError> {
        let marker = self
            .retry
            .run("GET version", || self.store.version())
            .await
            .map_err(|source| BuildError::CacheLoad { offset: 0, source })?;

        if marker.as_deref() == Some(version) {
            return Ok(());
        }
        Err(BuildError::CacheLoad {
            offset: 0,
            source: AppError::Cache {
                message: format!(
                    "version marker reads {:?} after load, expected {}",
                    marker, version
                ),
                transient: false,
            },
        })
    }

    async fn open_repository(&self, path: &std::path::Path) -> Result<NgdRepository, BuildError> {
        let write_error = |source| BuildError::Write {
            committed: 0,
            source,
        };
        let pool = open_output(path).await.map_err(write_error)?;
        NgdRepository::new(pool).await.map_err(write_error)
    }

    /// Drop duplicate pairs and pairs the output already holds
    async fn pending_pairs(
        &mut self,
        writer: &ResultWriter,
        pairs: Vec<ConceptPair>,
    ) -> Result<Vec<ConceptPair>, BuildError> {
        let total = pairs.len();
        let mut seen = HashSet::with_capacity(total);
        let mut pending = Vec::with_capacity(total);

        for pair in pairs {
            if !seen.insert(pair.canonical()) {
                continue;
            }
            if writer.has_record(pair.curie_a(), pair.curie_b()).await? {
                metrics::record_skip();
                self.progress.pairs_skipped += 1;
            } else {
                pending.push(pair);
            }
        }

        let duplicates = total - seen.len();
        if duplicates > 0 {
            debug!(duplicates, "Dropped duplicate pairs");
        }

        self.progress.pairs_total = seen.len() as u64;
        info!(
            total = seen.len(),
            pending = pending.len(),
            skipped = self.progress.pairs_skipped,
            "Concept pairs resolved"
        );
        Ok(pending)
    }

    /// Score `pending` on the worker pool and stream results to the writer
    async fn compute(
        &mut self,
        writer: ResultWriter,
        pending: Vec<ConceptPair>,
    ) -> Result<(), BuildError> {
        let (tx, writer) = writer.spawn(self.settings.queue_capacity);

        let engine = Arc::new(NgdEngine::new(
            Arc::clone(&self.store),
            self.normalizer,
            self.retry.clone(),
        ));
        let mut records = Box::pin(engine.compute_pairs(stream::iter(pending), self.settings.workers));

        let mut compute_error = None;
        while let Some(result) = records.next().await {
            match result {
                Ok(record) => {
                    if tx.send(record).await.is_err() {
                        // The writer stopped; its own error is reported below
                        break;
                    }
                    self.progress.pairs_computed += 1;
                    if self.progress.pairs_computed % PROGRESS_LOG_INTERVAL == 0 {
                        info!(computed = self.progress.pairs_computed, "Computing NGD");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Stopping dispatch");
                    compute_error = Some(e);
                    break;
                }
            }
        }

        // Closing the channel lets the writer flush what it already has
        drop(records);
        drop(tx);
        let written = writer.await?;

        match written {
            Ok(committed) => {
                self.progress.records_committed = committed;
                compute_error.map_or(Ok(()), Err)
            }
            Err(write_error) => {
                if let BuildError::Write { committed, .. } = &write_error {
                    self.progress.records_committed = *committed;
                }
                match compute_error {
                    Some(e) => {
                        warn!(error = %write_error, "Writer also failed");
                        Err(e)
                    }
                    None => Err(write_error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::SCENARIO_ROWS;
    use async_trait::async_trait;
    use curie_ngd_common::cache::MemoryCitationStore;
    use curie_ngd_common::staging::{snapshot_artifact_name, FsStager};
    use curie_ngd_common::{NgdRecord, NgdScore};
    use curie_ngd_common::db::snapshot_fixtures;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const VERSION: &str = "2.10.2";

    struct FakeSource {
        version: Option<String>,
        pairs: Vec<ConceptPair>,
        pair_calls: AtomicU32,
    }

    impl FakeSource {
        fn new(version: &str, pairs: Vec<ConceptPair>) -> Arc<Self> {
            Arc::new(Self {
                version: Some(version.to_string()),
                pairs,
                pair_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ConceptPairSource for FakeSource {
        async fn kg_version(&self) -> curie_ngd_common::Result<Option<String>> {
            Ok(self.version.clone())
        }

        async fn concept_pairs(&self) -> curie_ngd_common::Result<Vec<ConceptPair>> {
            self.pair_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pairs.clone())
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<MemoryCitationStore>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            snapshot_fixtures::write_file(&dir.path().join(snapshot_artifact_name(VERSION)), SCENARIO_ROWS)
                .await
                .unwrap();
            Self {
                dir,
                store: Arc::new(MemoryCitationStore::new()),
            }
        }

        fn output_path(&self) -> PathBuf {
            self.dir.path().join("out").join(output_artifact_name(VERSION))
        }

        fn orchestrator(&self, source: Arc<FakeSource>, workers: usize, commit: usize) -> Orchestrator {
            let settings = PipelineSettings {
                batch_size: 2,
                pipeline_size: 2,
                workers,
                commit_batch_size: commit,
                queue_capacity: 4,
                out_dir: self.dir.path().join("out"),
                publish: true,
            };
            let stager = FsStager::new(self.dir.path(), Some(self.dir.path().join("publish")));
            Orchestrator::new(
                settings,
                self.store.clone(),
                source,
                Arc::new(stager),
                Normalizer::new(3.5e7, 20.0).unwrap(),
                RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(2)),
            )
        }

        async fn repository(&self) -> NgdRepository {
            NgdRepository::new(open_output(&self.output_path()).await.unwrap())
                .await
                .unwrap()
        }
    }

    fn scenario_pairs() -> Vec<ConceptPair> {
        vec![
            ConceptPair::new("CURIE:1", "CURIE:2"),
            ConceptPair::new("CURIE:2", "CURIE:3"),
            ConceptPair::single("CURIE:1"),
            ConceptPair::new("CURIE:2", "CURIE:1"),
        ]
    }

    #[tokio::test]
    async fn test_full_build() {
        let fixture = Fixture::new().await;
        let mut orchestrator = fixture.orchestrator(FakeSource::new(VERSION, scenario_pairs()), 4, 2);

        let report = orchestrator.run(VERSION).await;

        assert_eq!(report.state, BuildState::Finalized);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            report.progress,
            BuildProgress {
                pairs_total: 3,
                pairs_skipped: 0,
                pairs_computed: 3,
                records_committed: 3,
            }
        );
        assert_eq!(fixture.store.version().await.unwrap().as_deref(), Some(VERSION));
        assert!(fixture
            .dir
            .path()
            .join("publish")
            .join(output_artifact_name(VERSION))
            .is_file());

        let repo = fixture.repository().await;
        let record = repo.get_record("CURIE:1", "CURIE:2").await.unwrap().unwrap();
        assert_eq!((record.count_a, record.count_b, record.intersection), (3, 4, 2));
        assert!(matches!(record.ngd, NgdScore::Value(v) if (v - 0.0360).abs() < 1e-3));

        let record = repo.get_record("CURIE:2", "CURIE:3").await.unwrap().unwrap();
        assert_eq!(record.ngd, NgdScore::Undefined);
        assert_eq!((record.count_a, record.count_b, record.intersection), (4, 0, 0));

        let record = repo.get_record("CURIE:1", "CURIE:1").await.unwrap().unwrap();
        assert_eq!(record.ngd, NgdScore::Value(0.0));
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_before_cache_mutation() {
        let fixture = Fixture::new().await;
        fixture.store.set_version("2.10.1").await.unwrap();
        let source = FakeSource::new("2.10.1", scenario_pairs());
        let mut orchestrator = fixture.orchestrator(source.clone(), 2, 2);

        let report = orchestrator.run(VERSION).await;

        assert_eq!(report.state, BuildState::Failed);
        assert_eq!(report.error_category, Some(ErrorCategory::Precondition));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(fixture.store.sadd_commands(), 0);
        assert_eq!(fixture.store.version().await.unwrap().as_deref(), Some("2.10.1"));
        assert_eq!(source.pair_calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.output_path().exists());
    }

    #[tokio::test]
    async fn test_invalid_version_string() {
        let fixture = Fixture::new().await;
        let mut orchestrator = fixture.orchestrator(FakeSource::new("2.10", scenario_pairs()), 2, 2);

        let report = orchestrator.run("2.10").await;

        assert_eq!(report.state, BuildState::Failed);
        assert_eq!(report.error_category, Some(ErrorCategory::Precondition));
        assert!(report.error.unwrap().contains("X.Y.Z"));
    }

    #[tokio::test]
    async fn test_resumed_build_keeps_committed_rows() {
        let fixture = Fixture::new().await;

        // A previous run committed one pair, in the reverse order, with a
        // value that differs from what this run would compute
        let repo = fixture.repository().await;
        let previous = NgdRecord::new(&ConceptPair::new("CURIE:2", "CURIE:1"), NgdScore::Value(0.99), 4, 3, 2);
        repo.insert_batch(&[previous.clone()]).await.unwrap();
        repo.close().await;

        let mut orchestrator = fixture.orchestrator(FakeSource::new(VERSION, scenario_pairs()), 2, 10);
        let report = orchestrator.run(VERSION).await;

        assert_eq!(report.state, BuildState::Finalized);
        assert_eq!(report.progress.pairs_skipped, 1);
        assert_eq!(report.progress.pairs_computed, 2);

        let repo = fixture.repository().await;
        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.get_record("CURIE:2", "CURIE:1").await.unwrap(), Some(previous));
        assert!(repo.get_record("CURIE:1", "CURIE:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loaded_cache_is_reused() {
        let fixture = Fixture::new().await;
        let mut first = fixture.orchestrator(FakeSource::new(VERSION, scenario_pairs()), 2, 2);
        assert_eq!(first.run(VERSION).await.state, BuildState::Finalized);
        let sadds = fixture.store.sadd_commands();

        let mut second = fixture.orchestrator(FakeSource::new(VERSION, scenario_pairs()), 2, 2);
        let report = second.run(VERSION).await;

        assert_eq!(report.state, BuildState::Finalized);
        assert_eq!(report.progress.pairs_skipped, 3);
        assert_eq!(fixture.store.sadd_commands(), sadds);
    }

    #[tokio::test]
    async fn test_compute_failure_keeps_committed_records() {
        let fixture = Fixture::new().await;
        // Load the cache first so only the compute phase sees the fault
        let mut warmup = fixture.orchestrator(FakeSource::new(VERSION, vec![]), 1, 1);
        assert_eq!(warmup.run(VERSION).await.state, BuildState::Finalized);
        fixture.store.poison("CURIE:3");

        let pairs = vec![
            ConceptPair::new("CURIE:1", "CURIE:2"),
            ConceptPair::new("CURIE:1", "CURIE:3"),
            ConceptPair::single("CURIE:2"),
        ];
        let mut orchestrator = fixture.orchestrator(FakeSource::new(VERSION, pairs), 1, 1);
        let report = orchestrator.run(VERSION).await;

        assert_eq!(report.state, BuildState::Failed);
        assert_eq!(report.error_category, Some(ErrorCategory::Compute));
        assert!(report.error.unwrap().contains("(CURIE:1, CURIE:3)"));
        assert_eq!(report.progress.records_committed, 1);

        let repo = fixture.repository().await;
        assert_eq!(repo.count().await.unwrap(), 1);
        let record = repo.get_record("CURIE:1", "CURIE:2").await.unwrap().unwrap();
        assert_eq!((record.count_a, record.count_b, record.intersection), (3, 4, 2));
    }

    #[test]
    fn test_transitions() {
        use BuildState::*;
        assert!(Idle.can_transition_to(CacheEnsuring));
        assert!(CacheEnsuring.can_transition_to(Computing));
        assert!(Computing.can_transition_to(Finalized));
        assert!(Idle.can_transition_to(Failed));
        assert!(Computing.can_transition_to(Failed));

        assert!(!Idle.can_transition_to(Computing));
        assert!(!CacheEnsuring.can_transition_to(Finalized));
        assert!(!Finalized.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(CacheEnsuring));
    }

    #[tokio::test]
    async fn test_orchestrator_runs_once() {
        let fixture = Fixture::new().await;
        let mut orchestrator = fixture.orchestrator(FakeSource::new(VERSION, vec![]), 1, 1);
        assert_eq!(orchestrator.run(VERSION).await.state, BuildState::Finalized);

        let report = orchestrator.run(VERSION).await;
        assert_eq!(report.state, BuildState::Failed);
        assert_eq!(report.error_category, Some(ErrorCategory::Internal));
        assert!(report.output_path.is_none());
        assert!(report.error.unwrap().contains("Finalized"));
        assert_eq!(orchestrator.state, BuildState::Finalized);
    }
}
