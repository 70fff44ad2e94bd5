//! HTTP API handlers and routing.

pub mod error;
mod health;
mod v1;

use axum::{
    http::{HeaderMap, HeaderValue, Request},
    Router,
};
use dockfleet_id::RequestId;
use tower_http::{
    request_id::{self, MakeRequestId, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/v1", v1::routes())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
        .with_state(state)
}

/// Stamps requests lacking an `x-request-id` with a fresh `req_` ID.
#[derive(Debug, Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<request_id::RequestId> {
        HeaderValue::from_str(&RequestId::new().to_string())
            .ok()
            .map(request_id::RequestId::new)
    }
}

/// Request ID set by the middleware, or a fresh one.
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| RequestId::new().to_string())
}
