//! Server Application State
//!
//! Shared state accessible by all HTTP and WebSocket handlers.

use std::sync::Arc;

use crate::broker::SessionHub;
use crate::registry::Registry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<Registry>,
    hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, hub: Arc<SessionHub>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { registry, hub }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.inner.hub
    }
}
