use crate::auth::{AuthError, TokenValidator, bearer_token};
use crate::errors::ApiError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS};
use crate::service::ContentService;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::AUTHORIZATION;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{make_boxed_error_response, make_json_response, make_text_response};
use shared::{counter, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::Instrument;

pub type ApiBody = BoxBody<Bytes, ApiError>;

const RESOURCE_PREFIX: &str = "/api/resource/";

#[derive(Debug, PartialEq)]
enum Route<'a> {
    Resource(&'a str),
    Health,
    Version,
    /// Unknown path under `/api/`, still behind authentication
    UnknownApi,
    NotFound,
}

impl<'a> Route<'a> {
    fn from_path(path: &'a str) -> Self {
        match path {
            "/healthcheck" => Route::Health,
            "/version" => Route::Version,
            _ => match path.strip_prefix(RESOURCE_PREFIX) {
                Some(id) if !id.is_empty() && !id.contains('/') => Route::Resource(id),
                _ if path.starts_with("/api/") => Route::UnknownApi,
                _ => Route::NotFound,
            },
        }
    }

    fn requires_auth(&self) -> bool {
        matches!(self, Route::Resource(_) | Route::UnknownApi)
    }

    fn label(&self) -> &'static str {
        match self {
            Route::Resource(_) => "resource",
            Route::Health => "healthcheck",
            Route::Version => "version",
            Route::UnknownApi | Route::NotFound => "not_found",
        }
    }
}

#[derive(Serialize)]
struct VersionInfo {
    build: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_commit: Option<&'static str>,
}

struct ApiState {
    service: ContentService,
    tokens: TokenValidator,
    next_request_id: AtomicU64,
}

/// The HTTP surface of the content API.
#[derive(Clone)]
pub struct ContentApi {
    state: Arc<ApiState>,
}

impl ContentApi {
    pub fn new(service: ContentService, tokens: TokenValidator) -> Self {
        ContentApi {
            state: Arc::new(ApiState {
                service,
                tokens,
                next_request_id: AtomicU64::new(0),
            }),
        }
    }

    /// Handles one request. Failures are turned into responses here, so this
    /// never fails.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ApiBody> {
        let request_id = self.state.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .map(|value| value.to_str().map(str::to_string));
        drop(req);

        let span = tracing::info_span!("request", id = request_id, %method, %path);

        async move {
            let start = Instant::now();
            let route = Route::from_path(&path);

            let response = self.dispatch(&route, &method, authorization).await;

            let status = response.status();
            let elapsed = start.elapsed();
            counter!(REQUESTS, "route" => route.label(), "status" => status.as_u16().to_string())
                .increment(1);
            histogram!(REQUEST_DURATION, "route" => route.label(), "status" => status.as_u16().to_string())
                .record(elapsed.as_secs_f64());
            tracing::info!(
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "request complete"
            );

            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        route: &Route<'_>,
        method: &Method,
        authorization: Option<Result<String, hyper::header::ToStrError>>,
    ) -> Response<ApiBody> {
        if route.requires_auth()
            && let Err(e) = self.authenticate(authorization)
        {
            tracing::warn!(error = %e, "authentication failed");
            return make_boxed_error_response(StatusCode::UNAUTHORIZED);
        }

        match route {
            Route::NotFound | Route::UnknownApi => make_boxed_error_response(StatusCode::NOT_FOUND),
            _ if method != Method::GET => make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED),
            Route::Resource(id) => self.resource(id).await,
            Route::Health => self.health().await,
            Route::Version => version(),
        }
    }

    fn authenticate(
        &self,
        authorization: Option<Result<String, hyper::header::ToStrError>>,
    ) -> Result<(), AuthError> {
        let header = authorization
            .ok_or(AuthError::MissingHeader)?
            .map_err(|_| AuthError::MalformedHeader)?;
        let token = bearer_token(&header)?;
        self.state.tokens.validate(token)?;
        Ok(())
    }

    async fn resource(&self, id: &str) -> Response<ApiBody> {
        let record = match self.state.service.resolve(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%id, kind = e.kind(), error = %e, "failed to resolve resource");
                return make_text_response(e.status_code(), e.to_string());
            }
        };

        match serde_json::to_vec(&record) {
            Ok(body) => {
                tracing::info!(%id, parts = record.rows.len(), "resolved resource");
                make_json_response(StatusCode::OK, body)
            }
            Err(e) => {
                tracing::error!(%id, error = %e, "failed to serialize resource");
                make_text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn health(&self) -> Response<ApiBody> {
        let report = self.state.service.probe().await;
        let status = if report.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        json_response(status, &report)
    }
}

fn version() -> Response<ApiBody> {
    let info = VersionInfo {
        build: env!("CARGO_PKG_VERSION"),
        git_commit: option_env!("GIT_COMMIT"),
    };
    json_response(StatusCode::OK, &info)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ApiBody> {
    match serde_json::to_vec(value) {
        Ok(body) => make_json_response(status, body),
        Err(e) => make_text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

impl Service<Request<Incoming>> for ContentApi {
    type Response = Response<ApiBody>;
    type Error = ApiError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let api = self.clone();
        Box::pin(async move { Ok(api.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{KEY, sign, valid_token};
    use crate::index::IndexError;
    use crate::service::tests::test_service;
    use http_body_util::{BodyExt, Empty};
    use hyper::header::CONTENT_TYPE;
    use serde_json::json;
    use shared::http::{APPLICATION_JSON, TEXT_PLAIN};

    fn api(failure: Option<IndexError>) -> ContentApi {
        ContentApi::new(test_service(failure), TokenValidator::new(KEY))
    }

    fn request(method: Method, path: &str, token: Option<&str>) -> Request<Empty<Bytes>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Empty::new()).unwrap()
    }

    async fn body_bytes(response: Response<ApiBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_routes() {
        assert_eq!(Route::from_path("/api/resource/rec1"), Route::Resource("rec1"));
        assert_eq!(Route::from_path("/api/resource/"), Route::UnknownApi);
        assert_eq!(Route::from_path("/api/resource/a/b"), Route::UnknownApi);
        assert_eq!(Route::from_path("/api/other"), Route::UnknownApi);
        assert_eq!(Route::from_path("/healthcheck"), Route::Health);
        assert_eq!(Route::from_path("/version"), Route::Version);
        assert_eq!(Route::from_path("/metrics"), Route::NotFound);
        assert_eq!(Route::from_path("/"), Route::NotFound);
    }

    #[tokio::test]
    async fn test_resource() {
        let token = valid_token();
        let response = api(None)
            .handle(request(Method::GET, "/api/resource/rec1", Some(token.as_str())))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["id"], "rec1");
        assert_eq!(body["parts"].as_array().unwrap().len(), 2);
        assert_eq!(body["parts"][1]["title"], "Page 2");
    }

    #[tokio::test]
    async fn test_resource_failures_are_plain_text() {
        let token = valid_token();

        let response = api(None)
            .handle(request(Method::GET, "/api/resource/missing", Some(token.as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], TEXT_PLAIN);
        assert_eq!(body_bytes(response).await, "item not found");

        let response = api(None)
            .handle(request(Method::GET, "/api/resource/broken", Some(token.as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        assert!(body.starts_with(b"invalid digital content fields: "));

        let response = api(Some(IndexError::Timeout))
            .handle(request(Method::GET, "/api/resource/rec1", Some(token.as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_bytes(response).await, "Solr request timed out");
    }

    #[tokio::test]
    async fn test_authentication() {
        let api = api(None);

        let response = api
            .handle(request(Method::GET, "/api/resource/rec1", None))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = api
            .handle(request(Method::GET, "/api/resource/rec1", Some("undefined")))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let forged = sign("wrong-key", json!({"alg": "HS256"}), json!({}));
        let response = api
            .handle(request(Method::GET, "/api/resource/rec1", Some(forged.as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let expired = sign(KEY, json!({"alg": "HS256"}), json!({"exp": 1}));
        let response = api
            .handle(request(Method::GET, "/api/resource/rec1", Some(expired.as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // authentication happens before routing
        let response = api.handle(request(Method::GET, "/api/nothing", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = api
            .handle(request(Method::GET, "/api/nothing", Some(valid_token().as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let response = api(None)
            .handle(request(Method::GET, "/healthcheck", None))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, json!({"solr": {"healthy": true}}));

        let response = api(Some(IndexError::ConnectionRefused))
            .handle(request(Method::GET, "/healthcheck", None))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(
            body,
            json!({"solr": {"healthy": false, "message": "Solr refused connection"}})
        );
    }

    #[tokio::test]
    async fn test_version_and_fallbacks() {
        let api = api(None);

        let response = api.handle(request(Method::GET, "/version", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["build"], env!("CARGO_PKG_VERSION"));

        let response = api.handle(request(Method::GET, "/metrics", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = api.handle(request(Method::POST, "/version", None)).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = api
            .handle(request(Method::DELETE, "/api/resource/rec1", Some(valid_token().as_str())))
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_serves_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(shared::http::serve_listener(listener, api(None)));

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://127.0.0.1:{port}/api/resource/rec1"))
            .bearer_auth(valid_token())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["parts"][0]["pid"], "rec1");
    }
}
