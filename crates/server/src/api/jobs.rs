use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use renec_core::{EntityKind, JobMode, Scope};
use renec_queue::{JobFilter, JobSnapshot, JobStatus, QueueError};
use renec_scheduler::rules::default_lane;
use renec_scheduler::ScheduleError;

use super::{api_error, bad_request, internal, not_found, ApiError};
use crate::state::AppState;

// ── Listing & lookup ──────────────────────────────────────────────

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<JobSnapshot>>, ApiError> {
    state.queue.list(&filter).await.map(Json).map_err(internal)
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, ApiError> {
    match state.queue.get(id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(not_found(format!("job not found: {id}"))),
        Err(e) => Err(internal(e)),
    }
}

// ── Cancellation ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    /// `cancelled` for a pending job; `running` means the worker stops at
    /// the next record boundary.
    pub status: JobStatus,
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    match state.queue.request_cancel(id).await {
        Ok(status) => {
            info!(job_id = %id, status = %status, "cancel requested");
            Ok(Json(CancelResponse { job_id: id, status }))
        }
        Err(QueueError::NotFound(_)) => Err(not_found(format!("job not found: {id}"))),
        Err(e @ QueueError::InvalidTransition { .. }) => Err(api_error(StatusCode::CONFLICT, e)),
        Err(e) => Err(internal(e)),
    }
}

// ── On-demand harvests ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HarvestRequest {
    pub mode: String,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub requested_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HarvestAccepted {
    pub job_id: Uuid,
    pub mode: JobMode,
    pub lane: renec_queue::Lane,
    pub scope: String,
}

pub async fn request_harvest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HarvestRequest>,
) -> Result<(StatusCode, Json<HarvestAccepted>), ApiError> {
    let mode: JobMode = req.mode.parse().map_err(bad_request)?;
    let kinds = req
        .kinds
        .iter()
        .map(|k| k.parse::<EntityKind>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(bad_request)?;
    let scope = Scope::kinds(kinds).with_keys(req.keys);
    let label = scope.label();

    let enqueued = state
        .scheduler
        .request_harvest(mode, scope, req.requested_by)
        .await
        .map_err(|e| match e {
            ScheduleError::Queue(q) => internal(q),
            other => bad_request(other),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(HarvestAccepted {
            job_id: enqueued.job_id(),
            mode,
            lane: default_lane(mode),
            scope: label,
        }),
    ))
}
