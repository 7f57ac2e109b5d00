//! HTTP API Module
//!
//! REST API endpoints served by every shard.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `shard`: Shard statistics
//! - `groups`: Durable and cached view of one group
//! - `commands`: Command submission through the broker
//! - `version`: Build metadata

mod commands;
mod groups;
mod health;
mod metrics;
mod shard;
mod state;
mod version;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/version", get(version::get_version))
        // Shard state
        .route("/shard", get(shard::get_shard))
        .route("/groups/{group_id}", get(groups::get_group))
        // Commands
        .route("/commands", post(commands::post_command))
        .with_state(state)
}
