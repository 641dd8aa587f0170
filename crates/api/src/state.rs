//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio::sync::watch;

use relay_engine::sink::BroadcastSink;
use relay_engine::{DispatchHandle, RecipientStore};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchHandle,
    pub store: Arc<dyn RecipientStore>,
    pub events: BroadcastSink,
    pub connected: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        dispatch: DispatchHandle,
        store: Arc<dyn RecipientStore>,
        events: BroadcastSink,
        connected: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dispatch,
            store,
            events,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}
