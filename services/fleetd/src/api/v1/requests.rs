//! Server request endpoint.
//!
//! `POST /v1/requests/{name}` where `name` is the server's request name and
//! the body is that request's JSON payload.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{info, warn};

use crate::api::{error::ApiError, request_id};
use crate::request::{dispatch, FleetRequest, FleetResponse, RequestKind};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/{name}", post(handle_request))
}

async fn handle_request(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_id = request_id(&headers);

    let kind = RequestKind::from_name(&name).map_err(|e| {
        warn!(request_id = %request_id, name = %name, "Unknown request name");
        ApiError::from(e).with_request_id(request_id.clone())
    })?;
    let request = FleetRequest::parse(kind, &body)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let response = dispatch(state.controller(), request).await.map_err(|e| {
        warn!(request_id = %request_id, kind = %kind, code = e.code(), error = %e, "Request failed");
        ApiError::from(e).with_request_id(request_id.clone())
    })?;

    info!(request_id = %request_id, kind = %kind, "Request handled");
    Ok(match response {
        FleetResponse::Completed => StatusCode::OK.into_response(),
        other => Json(other).into_response(),
    })
}
