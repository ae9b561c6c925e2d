//! Configuration management for the CURIE NGD build
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main build configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Citation cache (Redis) configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Snapshot loading configuration
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// NGD computation configuration
    #[serde(default)]
    pub compute: ComputeConfig,

    /// Output store configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Knowledge graph service configuration
    #[serde(default)]
    pub plover: PloverConfig,

    /// Retry policy for store and network calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Artifact staging configuration
    #[serde(default)]
    pub staging: StagingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL, including the database index (redis://host:port/db)
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_redis_command_timeout")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    /// Rows fetched from the snapshot per query
    #[serde(default = "default_snapshot_batch_size")]
    pub batch_size: usize,

    /// SADD commands per Redis pipeline
    #[serde(default = "default_pipeline_size")]
    pub pipeline_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComputeConfig {
    /// Concurrent NGD workers (0 means one per CPU)
    #[serde(default)]
    pub workers: usize,

    /// Number of PubMed citations and abstracts
    #[serde(default = "default_num_pubmed_articles")]
    pub num_pubmed_articles: f64,

    /// Average number of MeSH terms per article
    #[serde(default = "default_avg_mesh_terms")]
    pub avg_mesh_terms_per_article: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Records per output transaction
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,

    /// Directory holding the output database
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Capacity of the worker → writer channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PloverConfig {
    /// PloverDB base URL
    #[serde(default)]
    pub url: String,

    /// Path of the pair enumeration endpoint, relative to the base URL
    #[serde(default = "default_pairs_path")]
    pub pairs_path: String,

    /// Request timeout in seconds
    #[serde(default = "default_plover_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Backoff delay ceiling in milliseconds
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Where snapshot artifacts are looked up
    #[serde(default = "default_out_dir")]
    pub staging_dir: PathBuf,

    /// Where finished output artifacts are published (none to skip)
    pub publish_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info", "curie_ngd_builder=debug")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379/0".to_string() }
fn default_redis_connect_timeout() -> u64 { 5_000 }
fn default_redis_command_timeout() -> u64 { 30_000 }
fn default_snapshot_batch_size() -> usize { 1000 }
fn default_pipeline_size() -> usize { 1000 }
fn default_num_pubmed_articles() -> f64 { 3.5e7 }
fn default_avg_mesh_terms() -> f64 { 20.0 }
fn default_commit_batch_size() -> usize { 5000 }
fn default_out_dir() -> PathBuf { PathBuf::from(".") }
fn default_queue_capacity() -> usize { 10_000 }
fn default_pairs_path() -> String { "pairs".to_string() }
fn default_plover_timeout() -> u64 { 10 }
fn default_max_retries() -> u32 { 3 }
fn default_initial_interval() -> u64 { 200 }
fn default_max_interval() -> u64 { 5_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_ms: default_redis_connect_timeout(),
            command_timeout_ms: default_redis_command_timeout(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            batch_size: default_snapshot_batch_size(),
            pipeline_size: default_pipeline_size(),
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            num_pubmed_articles: default_num_pubmed_articles(),
            avg_mesh_terms_per_article: default_avg_mesh_terms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            commit_batch_size: default_commit_batch_size(),
            out_dir: default_out_dir(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for PloverConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pairs_path: default_pairs_path(),
            timeout_secs: default_plover_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_out_dir(),
            publish_dir: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            metrics_port: 0,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            snapshot: SnapshotConfig::default(),
            compute: ComputeConfig::default(),
            output: OutputConfig::default(),
            plover: PloverConfig::default(),
            retry: RetryConfig::default(),
            staging: StagingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__COMPUTE__WORKERS=16
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific configuration file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the build cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(AppError::Configuration {
                message: message.to_string(),
            })
        };

        if self.snapshot.batch_size == 0 || self.snapshot.pipeline_size == 0 {
            return invalid("snapshot batch_size and pipeline_size must be positive");
        }
        if self.output.commit_batch_size == 0 || self.output.queue_capacity == 0 {
            return invalid("output commit_batch_size and queue_capacity must be positive");
        }
        if !(self.compute.num_pubmed_articles > 0.0 && self.compute.avg_mesh_terms_per_article > 0.0) {
            return invalid("num_pubmed_articles and avg_mesh_terms_per_article must be positive");
        }
        if self.plover.url.is_empty() {
            return invalid("plover.url is required");
        }
        Ok(())
    }

    /// Worker count, resolving 0 to the available parallelism
    pub fn workers(&self) -> usize {
        if self.compute.workers > 0 {
            return self.compute.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
