use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

/// Large enough for the biggest request the engine accepts
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(handlers::execute_code))
        .route("/status", get(handlers::health_check))
        .route("/languages", get(handlers::list_languages))
        .route("/packages", get(handlers::list_packages))
        .route("/metrics", get(handlers::metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
