//! Serves short-lived rendition copies under `/files/served/...`

use crate::error::{HttpAppError, ValidatedPath};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
};
use futures::StreamExt;
use phonon_core::models::AudioFormat;
use phonon_core::AppError;
use phonon_storage::keys;
use std::sync::Arc;

#[tracing::instrument(skip(state), fields(operation = "get_served_file"))]
pub async fn get_served_file(
    State(state): State<Arc<AppState>>,
    ValidatedPath(key): ValidatedPath<String>,
) -> Result<Response, HttpAppError> {
    // Originals and stored renditions are only reachable through the audio routes
    if !keys::is_served_key(&key) {
        return Err(AppError::NotFound(format!("File not found: {}", key)).into());
    }

    let content_type = AudioFormat::from_filename(&key)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream");

    let stream = state.storage().download_stream(&key).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "private, max-age=300")
        .body(Body::from_stream(body_stream))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build response");
            HttpAppError::from(AppError::Internal(e.to_string()))
        })
}
