//! Router configuration for the HTTP API.
//!
//! This module sets up all routes, middleware (CORS, compression, tracing),
//! and creates the axum router ready for serving.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration - permissive for development, should be restricted in production
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let segmentation = Router::new()
        .route("/available-attributes", get(handlers::available_attributes))
        .route("/attributes", get(handlers::get_attributes))
        .route("/preview", post(handlers::preview_segmentation))
        .route("/analyze", post(handlers::analyze_segmentation))
        .route("/analyze/export", post(handlers::export_analysis))
        .route("/segment-details", post(handlers::get_segment_details));

    let write = Router::new()
        .route("/write-segments", post(handlers::write_segments))
        .route("/write-custom", post(handlers::write_custom))
        .route("/status/{transaction_id}", get(handlers::transaction_status))
        .route("/validate-config", get(handlers::validate_config))
        .route("/debug-payload", post(handlers::debug_payload));

    let api_v1 = Router::new()
        .nest("/dynamic-segmentation", segmentation)
        .nest("/xyz-write", write);

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_v1)
        // Custom writes can carry large assignment lists.
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::sap::TransportFactory;

    #[test]
    fn test_router_creation() {
        let state = AppState::new(AppConfig::default(), TransportFactory::create_local(Vec::new()));
        let _router = create_router(state);
        // If we got here, router was created successfully
    }
}
