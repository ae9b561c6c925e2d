//! CURIE NGD Common Library
//!
//! Shared code for the NGD database build including:
//! - Configuration management
//! - Error types and categories
//! - The citation cache protocol and its Redis implementation
//! - SQLite snapshot input and NGD output stores
//! - The PloverDB knowledge graph client
//! - Artifact staging, retries and metrics

pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod plover;
pub mod retry;
pub mod staging;

// Re-export commonly used types
pub use cache::CitationStore;
pub use config::AppConfig;
pub use db::models::{ConceptPair, NgdRecord, NgdScore};
pub use errors::{AppError, ErrorCategory, Result};
pub use plover::ConceptPairSource;
pub use retry::RetryPolicy;
pub use staging::ArtifactStager;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
