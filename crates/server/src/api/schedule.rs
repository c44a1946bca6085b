use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use renec_scheduler::{DriftRecord, TriggerView};

use crate::state::AppState;

pub async fn triggers(State(state): State<Arc<AppState>>) -> Json<Vec<TriggerView>> {
    Json(state.scheduler.triggers(Utc::now()).await)
}

/// Missed slots, newest first.
pub async fn drift(State(state): State<Arc<AppState>>) -> Json<Vec<DriftRecord>> {
    Json(state.scheduler.drift_records())
}
