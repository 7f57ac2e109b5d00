//! Group State Endpoint
//!
//! Shows both stores side by side so a reader can check that the cache still
//! agrees with the durable store.

use super::AppState;
use crate::models::GroupRecord;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use cgw_core::GroupId;
use serde::Serialize;

/// Response for GET /groups/{group_id}
#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub group_id: GroupId,
    pub durable: Option<GroupRecord>,
    pub cache: Option<GroupRecord>,
    /// Infras in the durable store
    pub infras: Vec<String>,
    /// Both stores hold the same owner and infra count, or both lack the group
    pub consistent: bool,
}

/// GET /groups/{group_id}
#[tracing::instrument(skip(state), fields(shard_id = state.shard_id))]
pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
) -> Result<impl IntoResponse, StatusCode> {
    let store_error = |e: crate::store::StoreError| {
        tracing::warn!(group_id, error = %e, "Failed to read group");
        StatusCode::SERVICE_UNAVAILABLE
    };

    let durable = state.table.durable().get_group(group_id).await.map_err(store_error)?;
    let cache = state.table.cache().get_group(group_id).await.map_err(store_error)?;
    if durable.is_none() && cache.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let infras = state
        .table
        .durable()
        .list_infras(group_id)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|infra| infra.mac.to_string())
        .collect();

    let consistent = match (&durable, &cache) {
        (Some(d), Some(c)) => d.agrees_with(c),
        _ => false,
    };

    Ok(Json(GroupResponse {
        group_id,
        durable,
        cache,
        infras,
        consistent,
    }))
}
