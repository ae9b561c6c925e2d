//! CURIE NGD Builder
//!
//! Builds the `curie_ngd` database for one KG2 version:
//! 1. Confirms the knowledge graph service serves that version
//! 2. Loads the CURIE → PMID snapshot into the citation cache (once per version)
//! 3. Scores every concept pair with NGD on a bounded worker pool
//! 4. Commits results in batches, skipping pairs from earlier runs
//! 5. Publishes the finished database

mod errors;
mod loader;
mod ngd;
mod pipeline;
mod writer;

use crate::ngd::Normalizer;
use crate::pipeline::{Orchestrator, PipelineSettings};
use clap::Parser;
use curie_ngd_common::{
    cache::RedisCitationStore,
    config::AppConfig,
    metrics::{register_metrics, PAIR_LATENCY_BUCKETS},
    plover::{validate_kg_version, PloverClient},
    staging::FsStager,
    AppError, ErrorCategory, RetryPolicy, VERSION,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Build the CURIE NGD database for a KG2 version
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// KG2 version to build for (X.Y.Z, e.g. 2.10.2)
    #[arg(long, value_parser = parse_kg_version)]
    kg_version: String,

    /// PloverDB base URL (overrides plover.url)
    #[arg(long)]
    plover_url: Option<String>,

    /// Configuration file (defaults to config/default, config/$APP_ENV, config/local)
    #[arg(short, long)]
    config: Option<String>,

    /// Concurrent NGD workers (overrides compute.workers)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory for the output database (overrides output.out_dir)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Leave the output in place instead of publishing it
    #[arg(long, default_value_t = false)]
    no_publish: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code(e.category().exit_code());
        }
    };

    init_tracing(&config);
    info!("Starting CURIE NGD Builder v{}", VERSION);

    if let Err(e) = init_metrics(config.observability.metrics_port) {
        error!(error = %e, "Failed to start metrics exporter");
        return exit_code(ErrorCategory::Internal.exit_code());
    }

    let mut orchestrator = match build_orchestrator(&config, &args).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, category = %e.category(), "Failed to initialize build");
            return exit_code(e.category().exit_code());
        }
    };

    let report = orchestrator.run(&args.kg_version).await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Failed to serialize build report"),
    }

    exit_code(report.exit_code())
}

fn parse_kg_version(value: &str) -> Result<String, String> {
    validate_kg_version(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Load configuration and apply command line overrides
fn load_config(args: &Args) -> Result<AppConfig, AppError> {
    let loaded = match &args.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    };
    let mut config = loaded.map_err(|e| AppError::Configuration {
        message: e.to_string(),
    })?;

    if let Some(url) = &args.plover_url {
        config.plover.url = url.clone();
    }
    if let Some(workers) = args.workers {
        config.compute.workers = workers;
    }
    if let Some(out_dir) = &args.out_dir {
        config.output.out_dir = out_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        register_metrics();
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("pair_duration_seconds".to_string()),
            PAIR_LATENCY_BUCKETS,
        )?
        .install()?;
    register_metrics();

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

async fn build_orchestrator(config: &AppConfig, args: &Args) -> Result<Orchestrator, AppError> {
    let retry = RetryPolicy::from_config(&config.retry);
    let normalizer = Normalizer::from_config(&config.compute)?;

    info!(url = %config.redis.url, "Connecting to citation cache...");
    let store = RedisCitationStore::connect(&config.redis).await?;
    store.ping().await?;

    let source = PloverClient::new(&config.plover, retry.clone())?;
    let stager = FsStager::new(
        config.staging.staging_dir.clone(),
        config.staging.publish_dir.clone(),
    );

    let mut settings = PipelineSettings::from_config(config);
    settings.publish = !args.no_publish;

    info!(
        workers = settings.workers,
        commit_batch_size = settings.commit_batch_size,
        log_n = normalizer.log_n(),
        "Build configured"
    );

    Ok(Orchestrator::new(
        settings,
        Arc::new(store),
        Arc::new(source),
        Arc::new(stager),
        normalizer,
        retry,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "ngd-builder",
            "--kg-version",
            "2.10.2",
            "--plover-url",
            "https://kg2cploverdb.ci.transltr.io",
            "--workers",
            "8",
            "--no-publish",
        ])
        .unwrap();

        assert_eq!(args.kg_version, "2.10.2");
        assert_eq!(args.workers, Some(8));
        assert!(args.no_publish);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_kg_version_is_required() {
        assert!(Args::try_parse_from(["ngd-builder"]).is_err());
        assert!(Args::try_parse_from(["ngd-builder", "--kg-version", "2.10"]).is_err());
        assert!(Args::try_parse_from(["ngd-builder", "--kg-version", "v2.10.2"]).is_err());
    }

    #[test]
    fn test_overrides_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("build.toml");
        std::fs::write(&path, "[plover]\nurl = \"http://localhost:9990\"\n").unwrap();

        let args = Args::try_parse_from([
            "ngd-builder",
            "--kg-version",
            "2.10.2",
            "--config",
            path.to_str().unwrap(),
            "--workers",
            "3",
            "--out-dir",
            "/tmp/ngd",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.plover.url, "http://localhost:9990");
        assert_eq!(config.compute.workers, 3);
        assert_eq!(config.output.out_dir, PathBuf::from("/tmp/ngd"));
    }

    #[test]
    fn test_missing_plover_url_is_a_precondition() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("build.toml");
        std::fs::write(&path, "[compute]\nworkers = 2\n").unwrap();

        let args = Args::try_parse_from([
            "ngd-builder",
            "--kg-version",
            "2.10.2",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let err = load_config(&args).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Precondition);
    }
}
