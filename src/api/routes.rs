//! API route definitions

use crate::catalog::CatalogRepository;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogRepository>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
///
/// Model ids contain `/` and must be percent-encoded in paths (`org%2Fname`).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Catalog
        .route("/models", get(handlers::list_models))
        .route(
            "/models/{id}",
            get(handlers::get_model).delete(handlers::delete_model),
        )
        .route("/models/{id}/verify", get(handlers::verify_model))
        .route(
            "/models/{id}/compatibility",
            get(handlers::check_compatibility),
        )
        .route("/models/{id}/download", post(handlers::download_model))
        .route("/models/{id}/load", post(handlers::load_model))
        // Downloads
        .route("/downloads", get(handlers::list_downloads))
        .route(
            "/downloads/history",
            get(handlers::download_history).delete(handlers::clear_download_history),
        )
        .route("/downloads/stats", get(handlers::download_stats))
        .route("/downloads/events", get(handlers::download_events))
        .route("/downloads/{id}", get(handlers::get_download))
        .route("/downloads/{id}/cancel", post(handlers::cancel_download))
        .route("/downloads/{id}/retry", post(handlers::retry_download))
        // Storage maintenance
        .route("/storage/stats", get(handlers::storage_stats))
        .route("/storage/cleanup", post(handlers::cleanup_storage))
        .route("/storage/rescan", post(handlers::rescan_storage))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
