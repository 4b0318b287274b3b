//! Route table for the prediction service.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use fakescope_core::MAX_IMAGE_BYTES;

use super::handlers;
use super::AppState;

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/predict", post(handlers::predict_url))
        .route("/predict/upload", post(handlers::predict_upload))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .with_state(state)
}
