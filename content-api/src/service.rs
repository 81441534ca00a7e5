//! The request pipeline: fetch, validate, project, derive.

use crate::assembler::{AssembledRecord, Assembler};
use crate::config::Config;
use crate::errors::{ApiError, ResourceError};
use crate::index::{DocumentIndex, SolrClient};
use crate::pdf::{PdfClient, PdfStatusSource};
use serde::Serialize;
use std::sync::Arc;

/// Identifier looked up by the health probe. It is not expected to exist.
pub const PROBE_ID: &str = "pingtest";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub solr: HealthStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.solr.healthy
    }
}

/// Everything a request needs, built once at startup and shared read-only
/// by all requests.
pub struct ContentService {
    index: Arc<dyn DocumentIndex>,
    assembler: Assembler,
}

impl ContentService {
    pub fn new(index: Arc<dyn DocumentIndex>, assembler: Assembler) -> Self {
        ContentService { index, assembler }
    }

    /// Validates `config` and builds the index and PDF clients.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let fields = config.validate()?;

        let index = SolrClient::new(&config.solr)?;
        let pdf = PdfClient::new(&config.pdf.client.settings(), &config.pdf.endpoints)?;
        let pdf: Arc<dyn PdfStatusSource> = Arc::new(pdf);

        Ok(ContentService::new(
            Arc::new(index),
            Assembler::new(Arc::new(fields), pdf, config.pdf.max_concurrency),
        ))
    }

    /// Resolves one record by identifier. Any failure fails the whole record.
    pub async fn resolve(&self, id: &str) -> Result<AssembledRecord, ResourceError> {
        let result = self.index.lookup(id).await?;

        let Some(doc) = result.documents.first() else {
            return Err(ResourceError::RecordNotFound);
        };

        if result.total_matches > 1 {
            tracing::warn!(%id, total = result.total_matches, "identifier matched several records");
        }

        Ok(self.assembler.assemble(doc, id).await?)
    }

    /// Checks that the index answers queries. A probe that finds nothing
    /// still counts as healthy.
    pub async fn probe(&self) -> HealthReport {
        let solr = match self.index.lookup(PROBE_ID).await {
            Ok(_) => HealthStatus {
                healthy: true,
                message: None,
            },
            Err(e) => {
                tracing::error!(error = %e, "health probe failed");
                HealthStatus {
                    healthy: false,
                    message: Some(e.to_string()),
                }
            }
        };

        HealthReport { solr }
    }
}
