pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, head, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::UploadConfig;
use crate::services::storage::StorageBackend;
use crate::services::upload_service::UploadService;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub uploads: Arc<UploadService>,
    pub config: UploadConfig,
}

pub fn create_app(state: AppState) -> Router {
    // Multipart framing adds overhead on top of the payload itself.
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(10 * 1024 * 1024);

    Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/files",
            post(api::handlers::uploads::create_upload)
                .options(api::handlers::uploads::options_files),
        )
        .route(
            "/files/:id",
            head(api::handlers::uploads::head_upload)
                .patch(api::handlers::uploads::patch_upload)
                .delete(api::handlers::uploads::delete_upload),
        )
        .route("/upload", post(api::handlers::ingest::ingest_file))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
