//! services/app/src/web/mod.rs
//!
//! The HTTP proxy in front of the marketplace backend. Every route forwards
//! the caller's bearer token and reports failures as `{ "error": string }`.

pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

pub use error::ApiError;
pub use middleware::{require_bearer, AccessToken};
pub use state::AppState;

/// Builds the `/api` router. CORS and Swagger UI are layered on by the binary.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/items", get(rest::list_items).post(rest::create_item))
        .route(
            "/api/items/{id}",
            get(rest::get_item)
                .put(rest::update_item)
                .delete(rest::delete_item),
        )
        .route("/api/categories", get(rest::list_categories))
        .route("/api/categories/{id}/children", get(rest::list_subcategories))
        .route("/api/users/{id}", get(rest::get_user_profile))
        .route("/api/conversations/{id}/messages", get(rest::get_chat_history))
        .route("/api/notifications", get(rest::list_notifications))
        .route("/api/notifications/read", post(rest::mark_notifications_read))
        .layer(axum_middleware::from_fn(require_bearer))
        .with_state(state)
}
