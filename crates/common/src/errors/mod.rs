//! Error types for the CURIE NGD build
//!
//! Provides:
//! - A single error type shared by every component
//! - Coarse categories that map to process exit codes
//! - Transient vs. fatal classification for the retry policy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error categories reported when a build terminates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Version mismatch, bad version string, missing snapshot, bad config
    Precondition,
    /// Decode failure or store failure while loading the cache
    CacheLoad,
    /// Timeouts and connection failures that exhausted their retries
    TransientIo,
    /// Store failure while scoring a pair
    Compute,
    /// Output store failure
    Write,
    Internal,
}

impl ErrorCategory {
    /// Process exit code for this category
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::Internal => 1,
            ErrorCategory::Precondition => 2,
            ErrorCategory::CacheLoad => 3,
            ErrorCategory::TransientIo => 4,
            ErrorCategory::Compute => 5,
            ErrorCategory::Write => 6,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Precondition => "precondition",
            ErrorCategory::CacheLoad => "cache-load",
            ErrorCategory::TransientIo => "transient-io",
            ErrorCategory::Compute => "compute",
            ErrorCategory::Write => "write",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Precondition errors
    #[error("Invalid KG version '{version}': expected X.Y.Z")]
    InvalidVersion { version: String },

    #[error("KG2 version mismatch: knowledge graph reports {reported}, expected {expected}")]
    VersionMismatch { expected: String, reported: String },

    #[error("Could not determine KG2 version: {message}")]
    VersionUnavailable { message: String },

    #[error("Snapshot unavailable at {path}: {message}")]
    SnapshotUnavailable { path: String, message: String },

    #[error("Checksum mismatch for {path}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // Data errors
    #[error("Malformed citation list for {curie}: {message}")]
    Decode { curie: String, message: String },

    // External service errors
    #[error("Cache error: {message}")]
    Cache { message: String, transient: bool },

    #[error("Upstream error: {message}")]
    Upstream { message: String, transient: bool },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Category of this error in isolation
    ///
    /// Builders refine this with the phase the error happened in.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidVersion { .. }
            | AppError::VersionMismatch { .. }
            | AppError::VersionUnavailable { .. }
            | AppError::SnapshotUnavailable { .. }
            | AppError::ChecksumMismatch { .. }
            | AppError::Configuration { .. } => ErrorCategory::Precondition,

            AppError::Decode { .. } | AppError::Cache { .. } => ErrorCategory::CacheLoad,

            AppError::Timeout { .. } | AppError::RetriesExhausted { .. } => {
                ErrorCategory::TransientIo
            }
            AppError::Upstream { transient: true, .. } => ErrorCategory::TransientIo,
            AppError::Upstream { .. } => ErrorCategory::Precondition,

            AppError::Database(_) => ErrorCategory::Write,

            AppError::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Check if retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Cache { transient, .. } | AppError::Upstream { transient, .. } => *transient,
            AppError::Timeout { .. } => true,
            AppError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        let transient = err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error();
        AppError::Cache {
            message: err.to_string(),
            transient,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.status().is_some_and(|s| s.is_server_error());
        AppError::Upstream {
            message: err.to_string(),
            transient,
        }
    }
}
