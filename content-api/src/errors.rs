use crate::config::ValidationError;
use crate::index::IndexError;
use crate::projector::{ProjectionError, Violation, join_violations};
use hyper::StatusCode;
use thiserror::Error;

/// Errors that stop the content API from starting or serving.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single resource request failed.
#[derive(Error, Debug, PartialEq)]
pub enum ResourceError {
    #[error("{0}")]
    IndexUnavailable(#[from] IndexError),

    #[error("item not found")]
    RecordNotFound,

    #[error("invalid digital content fields: {}", join_violations(.0))]
    StructuralInvalid(Vec<Violation>),

    #[error("no digital parts found in this item")]
    EmptyRecord,
}

impl From<ProjectionError> for ResourceError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::StructuralInvalid(violations) => {
                ResourceError::StructuralInvalid(violations)
            }
            ProjectionError::EmptyRecord => ResourceError::EmptyRecord,
        }
    }
}

impl ResourceError {
    /// Status sent to the client for this failure.
    ///
    /// Clients only distinguish success from failure, so every resource
    /// failure is reported as a server error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ResourceError::IndexUnavailable(_)
            | ResourceError::RecordNotFound
            | ResourceError::StructuralInvalid(_)
            | ResourceError::EmptyRecord => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceError::IndexUnavailable(_) => "index_unavailable",
            ResourceError::RecordNotFound => "not_found",
            ResourceError::StructuralInvalid(_) => "structural_invalid",
            ResourceError::EmptyRecord => "empty_record",
        }
    }
}
