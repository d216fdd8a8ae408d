//! HTTP error responses
//!
//! Every handler failure becomes a JSON `{"error": "..."}` body. Core errors
//! map to statuses by kind; the rest are boundary conditions (identity,
//! download keys, experiment access) whose statuses differ per flow.

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use phenofront_common::api::ErrorResponse;
use phenofront_common::Error;
use tracing::{error, warn};

#[derive(Debug)]
pub enum ApiError {
    /// No authenticated caller on the request
    NotLoggedIn,
    /// Bulk download without a download key
    MissingDownloadKey,
    /// Download key unknown or expired
    InvalidDownloadKey,
    /// Interactive selection of an experiment the caller may not use
    ExperimentNotAllowed(String),
    /// Bulk download naming an experiment the caller may not use
    InvalidExperimentSelection(String),
    /// Caller has not selected an experiment yet
    NoActiveExperiment,
    /// Query string that does not deserialize
    InvalidQuery(String),
    Core(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotLoggedIn => StatusCode::FORBIDDEN,
            ApiError::MissingDownloadKey => StatusCode::FORBIDDEN,
            ApiError::InvalidDownloadKey => StatusCode::BAD_REQUEST,
            ApiError::ExperimentNotAllowed(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidExperimentSelection(_) => StatusCode::FORBIDDEN,
            ApiError::NoActiveExperiment => StatusCode::BAD_REQUEST,
            ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(e) => match e {
                Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::DatastoreUnavailable(_)
                | Error::Configuration(_)
                | Error::ImageUnavailable { .. }
                | Error::TransferCancelled { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotLoggedIn => "User not logged in.".to_string(),
            ApiError::MissingDownloadKey => "Permission denied.".to_string(),
            ApiError::InvalidDownloadKey => "Invalid download key".to_string(),
            ApiError::ExperimentNotAllowed(_) => {
                "Experiment does not exist or is not allowed.".to_string()
            }
            ApiError::InvalidExperimentSelection(_) => "Invalid experiment selection".to_string(),
            ApiError::NoActiveExperiment => "No experiment selected.".to_string(),
            ApiError::InvalidQuery(detail) => detail.clone(),
            // Configuration details name file paths; keep them in the log
            ApiError::Core(Error::Configuration(_)) => {
                "Experiment configuration is invalid.".to_string()
            }
            ApiError::Core(Error::DatastoreUnavailable(_)) => {
                "Experiment database is unavailable.".to_string()
            }
            ApiError::Core(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Core(e) if status.is_server_error() => error!("Request failed: {}", e),
            ApiError::ExperimentNotAllowed(name) | ApiError::InvalidExperimentSelection(name) => {
                warn!("Refused access to experiment {}", name)
            }
            _ => {}
        }

        (status, Json(ErrorResponse::new(self.message()))).into_response()
    }
}
