pub mod api;
pub mod assembler;
pub mod auth;
pub mod config;
pub mod document;
pub mod errors;
pub mod fields;
pub mod index;
pub mod metrics_defs;
pub mod pdf;
pub mod projector;
pub mod service;

#[cfg(test)]
mod testutils;

use api::ContentApi;
use auth::TokenValidator;
use errors::ApiError;
use service::ContentService;
use shared::http::run_http_service;
use shared::metrics_defs::describe_all;

pub async fn run(config: config::Config) -> Result<(), ApiError> {
    describe_all(metrics_defs::ALL_METRICS);

    let service = ContentService::from_config(&config)?;
    let api = ContentApi::new(service, TokenValidator::new(&config.jwt_key));

    tracing::info!(solr = %config.solr.url(), "starting content api");
    run_http_service(&config.listener.host, config.listener.port, api).await
}
