//! Read-only fleet status.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dockfleet_reconcile::ClusterIdentity;
use serde::Serialize;

use crate::api::{error::ApiError, request_id};
use crate::controller::ClusterStatus;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_clusters))
        .route("/{identity}", get(get_cluster))
}

#[derive(Debug, Serialize)]
struct ListClustersResponse {
    items: Vec<ClusterStatus>,
}

async fn list_clusters(State(state): State<AppState>) -> impl IntoResponse {
    Json(ListClustersResponse {
        items: state.controller().fleet_status().await,
    })
}

async fn get_cluster(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ClusterStatus>, ApiError> {
    let request_id = request_id(&headers);
    let identity = ClusterIdentity::parse(&identity).map_err(|e| {
        ApiError::bad_request("invalid_cluster_identity", e.to_string())
            .with_request_id(request_id.clone())
    })?;

    state
        .controller()
        .cluster_status(&identity)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found("cluster_not_found", format!("cluster {identity} is not tracked"))
                .with_request_id(request_id)
        })
}
