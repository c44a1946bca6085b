//! HTTP handlers for the monitoring and control API.
//!
//! Submodules:
//! - `health`: liveness, backend, lane depth and entity counts
//! - `jobs`: job listing, lookup, cancellation and on-demand harvests
//! - `schedule`: trigger table and drift records
//! - `entities`: read-only entity and accreditation lookups

mod entities;
mod health;
mod jobs;
mod schedule;

#[cfg(test)]
mod tests;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

pub use entities::{entity_edges, get_entity};
pub use health::health;
pub use jobs::{cancel_job, get_job, list_jobs, request_harvest};
pub use schedule::{drift, triggers};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub(crate) fn bad_request(error: impl ToString) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, error)
}

pub(crate) fn not_found(error: impl ToString) -> ApiError {
    api_error(StatusCode::NOT_FOUND, error)
}

/// Backend failures are logged and reported without detail.
pub(crate) fn internal(error: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %error, "request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
