//! Application state shared across request handlers.

use std::sync::Arc;

use crate::hub::Hub;

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub::new()),
        }
    }
}
