//! HTTP router construction.

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::api;
use crate::state::AppState;

/// Build the application router.
pub fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/jobs", get(api::list_jobs))
        .route("/jobs/{id}", get(api::get_job))
        .route("/jobs/{id}/cancel", post(api::cancel_job))
        .route("/harvests", post(api::request_harvest))
        .route("/schedule", get(api::triggers))
        .route("/schedule/drift", get(api::drift))
        .route("/entities/{kind}/{key}", get(api::get_entity))
        .route("/entities/{kind}/{key}/edges", get(api::entity_edges))
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin; anything else must be a valid header value.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    if origin == "*" {
        return Ok(CorsLayer::permissive());
    }
    let value = origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS_ORIGIN {origin:?}"))?;
    Ok(CorsLayer::new()
        .allow_origin(value)
        .allow_methods(Any)
        .allow_headers(Any))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_single_origins_are_accepted() {
        assert!(cors_layer("*").is_ok());
        assert!(cors_layer("https://renec.example.mx").is_ok());
    }

    #[test]
    fn unparseable_origin_is_an_error() {
        let err = cors_layer("https://bad\norigin").unwrap_err();
        assert!(err.to_string().contains("CORS_ORIGIN"));
    }
}
