//! Prometheus Metrics Endpoint

use super::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// GET /metrics - this shard's gauges in Prometheus exposition format
#[tracing::instrument(skip(state), fields(shard_id = state.shard_id))]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
