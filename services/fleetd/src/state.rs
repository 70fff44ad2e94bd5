//! Application state shared across request handlers.

use std::sync::Arc;

use crate::controller::FleetController;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    controller: FleetController,
}

impl AppState {
    pub fn new(controller: FleetController) -> Self {
        Self {
            inner: Arc::new(AppStateInner { controller }),
        }
    }

    pub fn controller(&self) -> &FleetController {
        &self.inner.controller
    }
}
