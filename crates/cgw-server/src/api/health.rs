//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Liveness probe endpoint. Verifies the durable store answers.
#[tracing::instrument(skip(state), fields(shard_id = state.shard_id))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let store_check = tokio::time::timeout(Duration::from_secs(2), state.table.active_shards()).await;

    match store_check {
        Ok(Ok(_)) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Durable store health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("Durable store health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe endpoint. Returns OK once the shard consumes commands.
#[tracing::instrument(skip(state), fields(shard_id = state.shard_id))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
