use content_api::config::Config as ContentApiConfig;
use serde::Deserialize;
use std::fs::File;
use url::Url;

/// Replaces `content_api.solr.host` when set and non-empty.
pub const SOLR_HOST_ENV: &str = "DIGITAL_CONTENT_SOLR_HOST";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

fn default_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub content_api: ContentApiConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let mut config: Config = serde_yaml::from_reader(file)?;
        config.override_solr_host(std::env::var(SOLR_HOST_ENV).ok().as_deref())?;

        Ok(config)
    }

    fn override_solr_host(&mut self, host: Option<&str>) -> Result<(), ConfigError> {
        if let Some(host) = host
            && !host.is_empty()
        {
            self.content_api.solr.host = Url::parse(host)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid {SOLR_HOST_ENV}: {0}")]
    InvalidOverride(#[from] url::ParseError),
}
