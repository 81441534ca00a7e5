//! Single-document lookups against the Solr index.

use crate::config::{SolrConfig, SolrParams};
use crate::document::RawDocument;
use crate::metrics_defs::INDEX_QUERY_DURATION;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::histogram;
use std::time::Instant;

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum IndexError {
    #[error("Solr request timed out")]
    Timeout,
    #[error("Solr refused connection")]
    ConnectionRefused,
    #[error("failed to receive Solr response")]
    Request(String),
    #[error("received Solr response code {0}")]
    BadStatus(u16),
    #[error("failed to decode Solr response")]
    Decode(String),
    #[error("{code} - {message}")]
    Solr { code: i64, message: String },
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IndexError::Timeout
        } else if err.is_connect() {
            IndexError::ConnectionRefused
        } else {
            IndexError::Request(err.to_string())
        }
    }
}

/// Result of a lookup. An empty `documents` means nothing matched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub documents: Vec<RawDocument>,
    pub total_matches: u64,
}

/// An index that resolves record identifiers to raw documents.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Looks up at most one document by identifier.
    async fn lookup(&self, id: &str) -> Result<QueryResult, IndexError>;
}

#[derive(Debug, Serialize, PartialEq)]
struct SolrRequest<'a> {
    params: SolrRequestParams<'a>,
}

#[derive(Debug, Serialize, PartialEq)]
struct SolrRequestParams<'a> {
    q: String,
    qt: &'a str,
    #[serde(rename = "defType")]
    def_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fq: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fl: Vec<&'a str>,
    start: u32,
    rows: u32,
}

#[derive(Debug, Default, Deserialize)]
struct SolrResponseHeader {
    #[serde(default)]
    status: i64,
    #[serde(default, rename = "QTime")]
    qtime: i64,
}

#[derive(Debug, Default, Deserialize)]
struct SolrDocuments {
    #[serde(default, rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct SolrErrorBody {
    #[serde(default)]
    msg: String,
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct SolrResponse {
    #[serde(default, rename = "responseHeader")]
    header: SolrResponseHeader,
    #[serde(default)]
    response: SolrDocuments,
    error: Option<SolrErrorBody>,
}

/// Quotes `id` for use in a Lucene field query.
fn id_query(id: &str) -> String {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("id:\"{escaped}\"")
}

fn nonempty(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct SolrClient {
    client: reqwest::Client,
    url: String,
    params: SolrParams,
}

impl SolrClient {
    pub fn new(config: &SolrConfig) -> Result<Self, reqwest::Error> {
        Ok(SolrClient {
            client: config.client.settings().build_client()?,
            url: config.url(),
            params: config.params.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(client: reqwest::Client, url: String, params: SolrParams) -> Self {
        SolrClient {
            client,
            url,
            params,
        }
    }

    fn build_request(&self, id: &str) -> SolrRequest<'_> {
        SolrRequest {
            params: SolrRequestParams {
                q: id_query(id),
                qt: &self.params.qt,
                def_type: &self.params.deftype,
                fq: nonempty(&self.params.fq),
                fl: nonempty(&self.params.fl),
                start: 0,
                rows: 1,
            },
        }
    }

    async fn execute(&self, request: &SolrRequest<'_>) -> Result<QueryResult, IndexError> {
        // The query goes in the body rather than the URL to stay clear of 414s.
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let decoded = match serde_json::from_slice::<SolrResponse>(&body) {
            Ok(decoded) => decoded,
            Err(_) if !status.is_success() => return Err(IndexError::BadStatus(status.as_u16())),
            Err(e) => return Err(IndexError::Decode(e.to_string())),
        };

        if decoded.header.status != 0 || decoded.error.is_some() {
            let (code, message) = decoded
                .error
                .map(|e| (e.code, e.msg))
                .unwrap_or((decoded.header.status, String::new()));
            return Err(IndexError::Solr { code, message });
        }

        if !status.is_success() {
            return Err(IndexError::BadStatus(status.as_u16()));
        }

        tracing::debug!(
            status = decoded.header.status,
            qtime = decoded.header.qtime,
            rows = decoded.response.docs.len(),
            total = decoded.response.num_found,
            "Solr response"
        );

        Ok(QueryResult {
            documents: decoded.response.docs,
            total_matches: decoded.response.num_found,
        })
    }
}

#[async_trait]
impl DocumentIndex for SolrClient {
    async fn lookup(&self, id: &str) -> Result<QueryResult, IndexError> {
        let request = self.build_request(id);
        tracing::info!(q = %request.params.q, "Solr request");

        let start = Instant::now();
        let result = self.execute(&request).await;
        let elapsed = start.elapsed();
        histogram!(INDEX_QUERY_DURATION).record(elapsed.as_secs_f64());

        match &result {
            Ok(_) => tracing::info!(
                url = %self.url,
                elapsed_ms = elapsed.as_millis() as u64,
                "successful Solr response"
            ),
            Err(e) => tracing::error!(
                url = %self.url,
                error = ?e,
                elapsed_ms = elapsed.as_millis() as u64,
                "failed Solr response"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::testutils::{refused_url, spawn_server};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    fn params() -> SolrParams {
        SolrParams {
            qt: "search".into(),
            deftype: "lucene".into(),
            fq: vec!["shadowed_location_f:VISIBLE".into(), "".into()],
            fl: vec![],
        }
    }

    fn client(url: String, read_timeout: Duration) -> SolrClient {
        let settings = ClientSettings {
            connect_timeout: Duration::from_secs(1),
            read_timeout,
            pool_max_idle: 4,
            pool_idle_timeout: Duration::from_secs(5),
        };
        SolrClient::with_client(settings.build_client().unwrap(), url, params())
    }

    #[test]
    fn test_build_request() {
        let solr = client("http://solr/core/select".into(), Duration::from_secs(5));
        let request = serde_json::to_value(solr.build_request(r#"uva"lib\1"#)).unwrap();

        assert_eq!(
            request,
            json!({
                "params": {
                    "q": r#"id:"uva\"lib\\1""#,
                    "qt": "search",
                    "defType": "lucene",
                    "fq": ["shadowed_location_f:VISIBLE"],
                    "start": 0,
                    "rows": 1
                }
            })
        );
    }

    #[tokio::test]
    async fn test_lookup_success() {
        let url = spawn_server(Duration::ZERO, |parts, body| {
            assert_eq!(parts.method, http::Method::POST);
            let request: serde_json::Value = serde_json::from_slice(body).unwrap();
            assert_eq!(request["params"]["q"], "id:\"rec1\"");
            assert_eq!(request["params"]["rows"], 1);

            let response = json!({
                "responseHeader": {"status": 0, "QTime": 3},
                "response": {
                    "numFound": 1,
                    "start": 0,
                    "docs": [{"id": "rec1", "title_a": ["Page 1"]}]
                }
            });
            (StatusCode::OK, response.to_string())
        })
        .await;

        let result = client(url, Duration::from_secs(5))
            .lookup("rec1")
            .await
            .unwrap();
        assert_eq!(result.total_matches, 1);
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.documents[0].id.as_deref(), Some("rec1"));
        assert_eq!(result.documents[0].title, vec!["Page 1".to_string()]);
    }

    #[tokio::test]
    async fn test_lookup_not_found_is_empty() {
        let url = spawn_server(Duration::ZERO, |_, _| {
            let response = json!({
                "responseHeader": {"status": 0, "QTime": 1},
                "response": {"numFound": 0, "start": 0, "docs": []}
            });
            (StatusCode::OK, response.to_string())
        })
        .await;

        let result = client(url, Duration::from_secs(5))
            .lookup("missing")
            .await
            .unwrap();
        assert!(result.documents.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_solr_error() {
        let url = spawn_server(Duration::ZERO, |_, _| {
            let response = json!({
                "responseHeader": {"status": 400, "QTime": 1},
                "error": {"msg": "undefined field foo", "code": 400}
            });
            (StatusCode::BAD_REQUEST, response.to_string())
        })
        .await;

        let err = client(url, Duration::from_secs(5))
            .lookup("rec1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IndexError::Solr {
                code: 400,
                message: "undefined field foo".into()
            }
        );
        assert_eq!(err.to_string(), "400 - undefined field foo");
    }

    #[tokio::test]
    async fn test_lookup_bad_status_and_decode() {
        let url = spawn_server(Duration::ZERO, |_, _| {
            (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>".into())
        })
        .await;
        let err = client(url, Duration::from_secs(5))
            .lookup("rec1")
            .await
            .unwrap_err();
        assert_eq!(err, IndexError::BadStatus(502));

        let url = spawn_server(Duration::ZERO, |_, _| (StatusCode::OK, "not json".into())).await;
        let err = client(url, Duration::from_secs(5))
            .lookup("rec1")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
    }

    #[tokio::test]
    async fn test_lookup_transport_failures() {
        let url = spawn_server(Duration::from_secs(2), |_, _| (StatusCode::OK, "{}".into())).await;
        let err = client(url, Duration::from_millis(200))
            .lookup("rec1")
            .await
            .unwrap_err();
        assert_eq!(err, IndexError::Timeout);

        let err = client(refused_url().await, Duration::from_secs(5))
            .lookup("rec1")
            .await
            .unwrap_err();
        assert_eq!(err, IndexError::ConnectionRefused);
    }
}
