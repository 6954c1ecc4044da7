//! services/app/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use marketplace_core::MarketplaceBackend;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn MarketplaceBackend>,
}
