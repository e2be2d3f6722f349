use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use cortana_core::utils::preview;
use cortana_providers::WorkerModel;
use serde_json::Value;

use crate::state::AppState;

pub const INVALID_JSON: &str = "Invalid JSON in request body.";
pub const INVALID_BODY: &str =
    "Invalid request body: \"prompt\" field is required and must be a string.";
pub const PROCESSING_ERROR: &str = "Error processing request.";
pub const NOT_FOUND: &str =
    "Not found. Use POST /generate with a JSON body like {\"prompt\": \"your image prompt\"}";

/// `POST /generate/:model`
pub async fn generate_handler(
    State(state): State<AppState>,
    Path(model): Path<String>,
    body: Bytes,
) -> Response {
    let Some(model) = WorkerModel::from_slug(&model) else {
        return not_found_handler().await.into_response();
    };

    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return (StatusCode::BAD_REQUEST, INVALID_JSON).into_response(),
    };

    let Some(prompt) = request.get("prompt").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, INVALID_BODY).into_response();
    };

    tracing::info!("Generating with {}: {}", model, preview(prompt, 80));
    match state.runner.run(model, prompt).await {
        Ok(image) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            image,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Image generation with {} failed: {}", model, e);
            (StatusCode::INTERNAL_SERVER_ERROR, PROCESSING_ERROR).into_response()
        }
    }
}

/// Any other method or path
pub async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, NOT_FOUND)
}
