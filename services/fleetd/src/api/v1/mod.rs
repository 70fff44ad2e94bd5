//! API v1 routes.

mod clusters;
mod requests;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        // Server calls: /v1/requests/cd.go.elastic-agent.create-agent
        .nest("/requests", requests::routes())
        .nest("/clusters", clusters::routes())
}
