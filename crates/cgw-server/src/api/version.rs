//! Build Metadata Endpoint

use crate::version::{BuildInfo, BUILD};
use axum::Json;

/// GET /version
pub async fn get_version() -> Json<BuildInfo> {
    Json(BUILD)
}
