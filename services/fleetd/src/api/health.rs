//! Health check endpoints.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests.
    pub status: String,
    pub service: String,
    pub version: String,
    /// Current timestamp (ISO 8601).
    pub timestamp: String,
    /// Number of cluster registries held in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<usize>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
}

/// Health check with a count of tracked clusters.
///
/// Runtimes are not probed; an unreachable Docker endpoint only affects
/// its own clusters.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "fleetd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        clusters: Some(state.controller().cluster_count().await),
    })
}

/// Liveness probe. Never touches shared state.
async fn livez() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "fleetd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        clusters: None,
    })
}
