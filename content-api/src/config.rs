use crate::fields::{FieldSpecSet, FieldsConfig};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Client timeouts below this are raised to it.
pub const MIN_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Empty field name")]
    EmptyFieldName,

    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Field name is reserved: {0}")]
    ReservedFieldName(String),

    #[error("Field {0} does not name an index field")]
    MissingIndexField(String),

    #[error("Field {name} references unknown index field: {field}")]
    UnknownIndexField { name: String, field: String },

    #[error("Unhandled custom field: {0}")]
    UnknownCustomField(String),

    #[error("Item-level field {0} cannot be an array or custom field")]
    InvalidItemField(String),

    #[error("Custom field {0} requires iiif.manifest_prefix")]
    MissingManifestPrefix(String),

    #[error("Identifier {0} does not name an indexed part field")]
    UnknownIdentifier(String),

    #[error("pdf.max_concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Content API configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming requests
    #[serde(default)]
    pub listener: Listener,
    /// Key used to verify the signature of bearer tokens
    pub jwt_key: String,
    pub solr: SolrConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub iiif: IiifConfig,
    /// Output field specifications
    pub fields: FieldsConfig,
}

impl Config {
    /// Validates the configuration and resolves the field specifications.
    ///
    /// Everything that can be rejected is rejected here, once, at startup.
    pub fn validate(&self) -> Result<FieldSpecSet, ValidationError> {
        self.listener.validate()?;
        self.solr.validate()?;

        if self.jwt_key.is_empty() {
            return Err(ValidationError::MissingSetting("jwt_key"));
        }
        if self.pdf.max_concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }

        FieldSpecSet::resolve(&self.fields, &self.iiif, &self.pdf.endpoints)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Connection settings shared by the outbound HTTP clients.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_timeout_secs")]
    pub conn_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    MIN_TIMEOUT_SECS
}

fn default_pool_max_idle() -> usize {
    100
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            conn_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            pool_max_idle: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.conn_timeout_secs.max(MIN_TIMEOUT_SECS)),
            read_timeout: Duration::from_secs(self.read_timeout_secs.max(MIN_TIMEOUT_SECS)),
            pool_max_idle: self.pool_max_idle,
            pool_idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
        }
    }
}

/// Resolved client settings. The connection pool behind a client built
/// from these is shared by every request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    /// Applies to the whole request, including reading the body.
    pub read_timeout: Duration,
    pub pool_max_idle: usize,
    pub pool_idle_timeout: Duration,
}

impl ClientSettings {
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .pool_max_idle_per_host(self.pool_max_idle)
            .pool_idle_timeout(self.pool_idle_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SolrConfig {
    /// Base URL of the Solr server
    pub host: Url,
    pub core: String,
    pub handler: String,
    #[serde(flatten)]
    pub client: ClientConfig,
    pub params: SolrParams,
}

impl SolrConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            (&self.core, "solr.core"),
            (&self.handler, "solr.handler"),
            (&self.params.qt, "solr.params.qt"),
            (&self.params.deftype, "solr.params.deftype"),
        ];

        for (value, label) in required {
            if value.is_empty() {
                return Err(ValidationError::MissingSetting(label));
            }
        }

        Ok(())
    }

    /// Full URL of the request handler, e.g. `http://solr:8080/solr/core/select`.
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.host.as_str().trim_end_matches('/'),
            self.core,
            self.handler
        )
    }
}

/// Fixed query parameters sent with every lookup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SolrParams {
    pub qt: String,
    pub deftype: String,
    #[serde(default)]
    pub fq: Vec<String>,
    #[serde(default)]
    pub fl: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PdfConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
    #[serde(default)]
    pub endpoints: PdfEndpoints,
    /// Upper bound on status lookups in flight for one record
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    16
}

impl Default for PdfConfig {
    fn default() -> Self {
        PdfConfig {
            client: ClientConfig::default(),
            endpoints: PdfEndpoints::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Path suffixes appended to `{base}/{id}` on the PDF service.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PdfEndpoints {
    #[serde(default)]
    pub generate: String,
    #[serde(default = "default_status_endpoint")]
    pub status: String,
    #[serde(default = "default_download_endpoint")]
    pub download: String,
}

fn default_status_endpoint() -> String {
    "/status".into()
}

fn default_download_endpoint() -> String {
    "/download".into()
}

impl Default for PdfEndpoints {
    fn default() -> Self {
        PdfEndpoints {
            generate: String::new(),
            status: default_status_endpoint(),
            download: default_download_endpoint(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct IiifConfig {
    /// Prepended to a part identifier to build its manifest URL
    #[serde(default)]
    pub manifest_prefix: String,
}
