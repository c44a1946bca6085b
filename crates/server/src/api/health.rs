use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use renec_queue::{Lane, LaneDepth};

use super::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    pub started_at: DateTime<Utc>,
    pub store_reachable: bool,
    pub lanes: BTreeMap<&'static str, LaneDepth>,
    pub entities: BTreeMap<String, u64>,
    pub config: serde_json::Value,
}

/// `degraded` (still 200) when the store does not answer.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let store_reachable = state.store.ping().await.is_ok();

    let mut lanes = BTreeMap::new();
    for lane in [Lane::Harvest, Lane::Monitoring] {
        let depth = state
            .queue
            .depth(lane)
            .await
            .map_err(|e| super::api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;
        lanes.insert(lane.as_str(), depth);
    }

    let entities = if store_reachable {
        state
            .store
            .counts()
            .await
            .map(|c| c.into_iter().map(|(k, n)| (k.as_str().to_string(), n)).collect())
            .unwrap_or_default()
    } else {
        BTreeMap::new()
    };

    Ok(Json(HealthResponse {
        status: if store_reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend,
        started_at: state.started_at,
        store_reachable,
        lanes,
        entities,
        config: state.config.clone(),
    }))
}
