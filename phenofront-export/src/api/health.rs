//! Health check endpoint

use axum::{routing::get, Json, Router};
use phenofront_common::api::HealthResponse;

use crate::AppState;

/// GET /health
///
/// Needs no caller identity.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "phenofront-export".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
