pub mod error;
pub mod routes;

use crate::state::PlateServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};

pub use error::ApiError;

/// Build the API router, plus the dashboard when a static directory is configured
pub fn router(state: PlateServiceState) -> Router {
    let max_upload_bytes = state.config().max_upload_bytes;

    let mut router = Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Recognition and history
        .route("/upload", post(routes::upload))
        .route("/history", get(routes::history));

    if let Some(static_dir) = &state.config().static_dir {
        let dashboard = ServeDir::new(static_dir).append_index_html_on_directories(true);
        router = router.fallback_service(dashboard);
    }

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
