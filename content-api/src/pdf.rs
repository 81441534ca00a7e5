use crate::config::{ClientSettings, PdfEndpoints};
use crate::metrics_defs::{PDF_STATUS_DURATION, PDF_STATUS_FAILURES};
use async_trait::async_trait;
use reqwest::StatusCode;
use shared::{counter, histogram};
use std::time::Instant;

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum PdfError {
    #[error("PDF status request timed out")]
    Timeout,
    #[error("PDF status service refused connection")]
    ConnectionRefused,
    #[error("failed to receive PDF status response: {0}")]
    Request(String),
    #[error("received PDF status response code {0}")]
    BadStatus(u16),
    #[error("error reading PDF status response: {0}")]
    Decode(String),
}

impl PdfError {
    fn kind(&self) -> &'static str {
        match self {
            PdfError::Timeout => "timeout",
            PdfError::ConnectionRefused => "connection_refused",
            PdfError::Request(_) => "request",
            PdfError::BadStatus(_) => "bad_status",
            PdfError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for PdfError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PdfError::Timeout
        } else if err.is_connect() {
            PdfError::ConnectionRefused
        } else {
            PdfError::Request(err.to_string())
        }
    }
}

/// Source of PDF generation status for a single part.
#[async_trait]
pub trait PdfStatusSource: Send + Sync {
    /// Returns the status string the PDF service reports for `id`, where
    /// `base_url` is the per-record PDF service root.
    async fn status(&self, base_url: &str, id: &str) -> Result<String, PdfError>;
}

/// Builds `{base}/{id}{endpoint}`.
pub fn pdf_url(base_url: &str, id: &str, endpoint: &str) -> String {
    format!("{}/{id}{endpoint}", base_url.trim_end_matches('/'))
}

#[derive(Clone)]
pub struct PdfClient {
    client: reqwest::Client,
    status_endpoint: String,
}

impl PdfClient {
    pub fn new(settings: &ClientSettings, endpoints: &PdfEndpoints) -> Result<Self, reqwest::Error> {
        Ok(PdfClient {
            client: settings.build_client()?,
            status_endpoint: endpoints.status.clone(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, PdfError> {
        let response = self.client.get(url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(PdfError::BadStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let status = String::from_utf8(body.to_vec()).map_err(|e| PdfError::Decode(e.to_string()))?;

        Ok(status.trim_end().to_string())
    }
}

#[async_trait]
impl PdfStatusSource for PdfClient {
    async fn status(&self, base_url: &str, id: &str) -> Result<String, PdfError> {
        let url = pdf_url(base_url, id, &self.status_endpoint);

        let start = Instant::now();
        let result = self.fetch(&url).await;
        let elapsed = start.elapsed();
        histogram!(PDF_STATUS_DURATION).record(elapsed.as_secs_f64());

        match &result {
            Ok(_) => tracing::info!(
                %url,
                elapsed_ms = elapsed.as_millis() as u64,
                "successful PDF status response"
            ),
            Err(e) => {
                counter!(PDF_STATUS_FAILURES, "reason" => e.kind()).increment(1);
                tracing::warn!(
                    %url,
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "failed PDF status response"
                );
            }
        }

        result
    }
}
