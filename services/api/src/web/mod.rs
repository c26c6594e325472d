pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
pub use rest::ApiDoc;
pub use state::AppState;

/// Builds the API router. Every route requires the caller's `x-user-id`.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/user", get(rest::get_user_handler).patch(rest::patch_user_handler))
        .route("/user/storage", get(rest::get_storage_handler))
        .route("/tags", get(rest::list_tags_handler).put(rest::update_tag_handler))
        .route("/tags/{id}", patch(rest::patch_tag_handler).delete(rest::delete_tag_handler))
        .route("/books", get(rest::list_books_handler))
        .route("/books/quota", get(rest::check_quota_handler))
        .route("/books/{id}", get(rest::get_book_handler).delete(rest::delete_book_handler))
        .layer(axum_middleware::from_fn(require_user))
        .with_state(app_state)
}
