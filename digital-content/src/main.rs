mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use content_api::errors::ApiError;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "digital_content";

#[derive(Parser)]
#[command(version, about = "Digital content API")]
enum CliCommand {
    /// Serve the content API
    Serve(ConfigArgs),
    /// Load and validate a config file, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Serve(args) => serve(&args.config_file),
        CliCommand::CheckConfig(args) => check_config(&args.config_file),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn check_config(path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    config
        .content_api
        .validate()
        .map_err(|e| CliError::Api(e.into()))?;
    println!("{} is valid", path.display());
    Ok(())
}

fn serve(path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;

    // dropping the guard flushes pending sentry events
    let _sentry = init_logging(&config.common.logging)?;

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tracing::info!(config_file = %path.display(), "starting digital content service");
    let result = runtime.block_on(content_api::run(config.content_api));
    if let Err(e) = &result {
        tracing::error!(error = %e, "content api stopped");
    }

    Ok(result?)
}

fn init_logging(config: &LoggingConfig) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let guard = match config.sentry_dsn.as_deref() {
        Some(dsn) if !dsn.is_empty() => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        _ => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "sending metrics to statsd"
    );
    Ok(())
}
