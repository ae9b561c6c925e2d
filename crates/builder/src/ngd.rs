//! Normalized Google Distance over the citation cache
//!
//! NGD(a, b) = (ln max(|A|, |B|) - ln |A ∩ B|) / (ln N - ln min(|A|, |B|))
//!
//! where N is the normalizing constant (articles × terms per article).

use crate::errors::BuildError;
use curie_ngd_common::config::ComputeConfig;
use curie_ngd_common::{
    metrics, AppError, CitationStore, ConceptPair, NgdRecord, NgdScore, RetryPolicy,
};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Normalizing constant N, held as ln N
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    log_n: f64,
}

impl Normalizer {
    pub fn new(num_articles: f64, avg_terms_per_article: f64) -> Result<Self, AppError> {
        let n = num_articles * avg_terms_per_article;
        if !(n.is_finite() && n > 0.0) {
            return Err(AppError::Configuration {
                message: format!(
                    "normalizing constant must be positive and finite, got {num_articles} x {avg_terms_per_article}"
                ),
            });
        }
        Ok(Self { log_n: n.ln() })
    }

    pub fn from_config(config: &ComputeConfig) -> Result<Self, AppError> {
        Self::new(config.num_pubmed_articles, config.avg_mesh_terms_per_article)
    }

    pub fn log_n(&self) -> f64 {
        self.log_n
    }
}

/// Score a pair from its citation counts
///
/// Symmetric in `count_a`/`count_b`. Never returns a non-finite value.
pub fn ngd_score(count_a: u64, count_b: u64, intersection: u64, normalizer: &Normalizer) -> NgdScore {
    if count_a == 0 || count_b == 0 {
        return NgdScore::Undefined;
    }

    let (max, min) = if count_a >= count_b {
        (count_a, count_b)
    } else {
        (count_b, count_a)
    };

    let denominator = normalizer.log_n - (min as f64).ln();
    if denominator <= 0.0 {
        return NgdScore::Undefined;
    }

    if intersection == 0 {
        return NgdScore::MaxDistance;
    }

    let value = ((max as f64).ln() - (intersection as f64).ln()) / denominator;
    if value.is_finite() {
        NgdScore::Value(value)
    } else {
        NgdScore::Undefined
    }
}

/// Scores concept pairs against the citation cache
pub struct NgdEngine {
    store: Arc<dyn CitationStore>,
    normalizer: Normalizer,
    retry: RetryPolicy,
}

impl NgdEngine {
    pub fn new(store: Arc<dyn CitationStore>, normalizer: Normalizer, retry: RetryPolicy) -> Self {
        Self {
            store,
            normalizer,
            retry,
        }
    }

    /// Read the counts for one pair and score it
    pub async fn compute_pair(&self, pair: &ConceptPair) -> Result<NgdRecord, AppError> {
        let start = Instant::now();
        let (a, b) = (pair.curie_a(), pair.curie_b());

        let count_a = self.retry.run("SCARD", || self.store.cardinality(a)).await?;
        let count_b = self.retry.run("SCARD", || self.store.cardinality(b)).await?;

        let intersection = if count_a == 0 || count_b == 0 {
            0
        } else {
            self.retry
                .run("SINTERCARD", || self.store.intersection_cardinality(a, b))
                .await?
        };

        let score = ngd_score(count_a, count_b, intersection, &self.normalizer);
        metrics::record_pair(start.elapsed().as_secs_f64(), score.kind());
        trace!(%pair, count_a, count_b, intersection, kind = score.kind(), "Scored pair");

        Ok(NgdRecord::new(pair, score, count_a, count_b, intersection))
    }

    /// Score a stream of pairs on up to `workers` concurrent tasks
    ///
    /// Records arrive in completion order. Dropping the returned stream stops
    /// dispatch; pairs already running finish in the background.
    pub fn compute_pairs<S>(
        self: &Arc<Self>,
        pairs: S,
        workers: usize,
    ) -> impl Stream<Item = Result<NgdRecord, BuildError>> + Send + 'static
    where
        S: Stream<Item = ConceptPair> + Send + 'static,
    {
        let engine = Arc::clone(self);
        pairs
            .map(move |pair| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    match engine.compute_pair(&pair).await {
                        Ok(record) => Ok(record),
                        Err(source) => Err(BuildError::Compute { pair, source }),
                    }
                })
            })
            .buffer_unordered(workers.max(1))
            .map(|joined| joined.map_err(BuildError::from).and_then(|result| result))
    }
}
