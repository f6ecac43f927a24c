use super::error::ApiError;
use crate::state::PlateServiceState;
use crate::types::UploadResponse;
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

/// Multipart part that carries the image
pub const IMAGE_FIELD: &str = "image";

/// Accept one image, run recognition and return detections plus the annotated copy
pub async fn upload(
    State(state): State<PlateServiceState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            image = Some(field.bytes().await?);
            break;
        }
    }

    let bytes = image.ok_or_else(|| {
        ApiError::bad_request(format!("missing multipart field '{}'", IMAGE_FIELD))
    })?;

    let response = state.submit_image(bytes.to_vec()).await?;
    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Recent plate events as `[plate, confidence, timestamp, action]` rows, newest first
pub async fn history(
    State(state): State<PlateServiceState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.history(query.limit).await?;
    let rows: Vec<_> = records.iter().map(|r| r.as_row()).collect();
    Ok(Json(json!(rows)))
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "plate-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<PlateServiceState>) -> impl IntoResponse {
    match state.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "detector_instances": state.pipeline().detector().size(),
                "recognizer_instances": state.pipeline().recognizer().size(),
            })),
        ),
        Err(e) => {
            tracing::warn!("History store not ready: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::encode_metrics() {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
