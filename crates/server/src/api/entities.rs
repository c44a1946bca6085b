use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use renec_core::{AccreditationEdge, Entity, EntityKind, EntityRef};

use super::{bad_request, internal, not_found, ApiError};
use crate::state::AppState;

fn entity_ref(kind: &str, key: String) -> Result<EntityRef, ApiError> {
    let kind: EntityKind = kind.parse().map_err(bad_request)?;
    Ok(EntityRef::new(kind, key))
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path((kind, key)): Path<(String, String)>,
) -> Result<Json<Entity>, ApiError> {
    let entity = entity_ref(&kind, key)?;
    match state.store.get(&entity).await {
        Ok(Some(found)) => Ok(Json(found)),
        Ok(None) => Err(not_found(format!("entity not found: {entity}"))),
        Err(e) => Err(internal(e)),
    }
}

#[derive(Serialize)]
pub struct EdgesResponse {
    pub entity: EntityRef,
    pub current: usize,
    pub edges: Vec<AccreditationEdge>,
}

/// Every accreditation edge touching the entity, retired ones included.
pub async fn entity_edges(
    State(state): State<Arc<AppState>>,
    Path((kind, key)): Path<(String, String)>,
) -> Result<Json<EdgesResponse>, ApiError> {
    let entity = entity_ref(&kind, key)?;
    if state.store.get(&entity).await.map_err(internal)?.is_none() {
        return Err(not_found(format!("entity not found: {entity}")));
    }
    let edges = state.store.edges_for(&entity).await.map_err(internal)?;
    Ok(Json(EdgesResponse {
        current: edges.iter().filter(|e| e.current).count(),
        entity,
        edges,
    }))
}
