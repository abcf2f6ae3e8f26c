//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! The whole canvas lives behind one mutex: registry, history, and client
//! channels are locked together for the duration of a single request, so
//! every request observes and leaves a consistent state. There are no
//! per-field locks.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::services::canvas::Canvas;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub canvas: Arc<Mutex<Canvas>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { canvas: Arc::new(Mutex::new(Canvas::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
