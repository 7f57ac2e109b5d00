//! Shard Statistics Endpoint

use super::AppState;
use crate::shard::{GetShardStats, ShardStats};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use cgw_core::Partition;
use serde::Serialize;

/// Response for GET /shard
#[derive(Debug, Serialize)]
pub struct ShardResponse {
    #[serde(flatten)]
    pub stats: ShardStats,
    /// Command-topic partitions this shard consumes
    pub partitions: Vec<Partition>,
}

/// GET /shard - counters, capacities and partition assignment of this shard
#[tracing::instrument(skip(state), fields(shard_id = state.shard_id))]
pub async fn get_shard(State(state): State<AppState>) -> impl IntoResponse {
    match state.shard_ref.ask(GetShardStats).send().await {
        Ok(stats) => {
            let partitions = state.client.partitions_for_shard(state.shard_id);
            Ok(Json(ShardResponse { stats, partitions }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to get shard stats");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
