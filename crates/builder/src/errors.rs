//! Builder error types
//!
//! Wraps component errors with the phase they happened in and the context
//! needed to resume or diagnose the build.

use crate::pipeline::BuildState;
use curie_ngd_common::{AppError, ConceptPair, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Precondition failed: {0}")]
    Precondition(#[source] AppError),

    #[error("Cache load failed at snapshot row {offset}: {source}")]
    CacheLoad { offset: u64, source: AppError },

    #[error("Concept pair source failed: {0}")]
    PairSource(#[source] AppError),

    #[error("NGD computation failed for pair {pair}: {source}")]
    Compute { pair: ConceptPair, source: AppError },

    #[error("Result write failed after {committed} committed records: {source}")]
    Write { committed: u64, source: AppError },

    #[error("Invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: BuildState, to: BuildState },

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl BuildError {
    /// Category reported for this failure
    pub fn category(&self) -> ErrorCategory {
        match self {
            BuildError::Precondition(e) | BuildError::PairSource(e) => match e.category() {
                ErrorCategory::TransientIo => ErrorCategory::TransientIo,
                _ => ErrorCategory::Precondition,
            },
            BuildError::CacheLoad { source, .. } => match source.category() {
                ErrorCategory::Precondition => ErrorCategory::Precondition,
                _ => ErrorCategory::CacheLoad,
            },
            BuildError::Compute { source, .. } => match source.category() {
                ErrorCategory::TransientIo => ErrorCategory::TransientIo,
                _ => ErrorCategory::Compute,
            },
            BuildError::Write { .. } => ErrorCategory::Write,
            BuildError::InvalidTransition { .. } | BuildError::Worker(_) => ErrorCategory::Internal,
        }
    }
}
