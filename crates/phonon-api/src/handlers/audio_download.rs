use crate::error::{HttpAppError, ValidatedPath};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use futures::StreamExt;
use phonon_core::models::AudioFormat;
use phonon_core::AppError;
use std::sync::Arc;

/// `GET /audio/user/{user_id}/phrase/{phrase_id}/{audio_format}`: stream the
/// converted rendition
#[tracing::instrument(skip(state), fields(operation = "download_audio"))]
pub async fn download_audio(
    State(state): State<Arc<AppState>>,
    ValidatedPath((user_id, phrase_id, audio_format)): ValidatedPath<(i64, i64, String)>,
) -> Result<impl IntoResponse, HttpAppError> {
    let stored_uri = state
        .audio
        .fetch(user_id, phrase_id, &audio_format)
        .await?;
    let format = AudioFormat::from_filename(&stored_uri)
        .ok_or_else(|| AppError::Internal(format!("Unrecognised stored URI {}", stored_uri)))?;

    tracing::debug!(uri = %stored_uri, "Streaming audio from storage");

    let stream = state.storage().download_stream(&stored_uri).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    let content_disposition = format!(
        "attachment; filename=\"{}_{}.{}\"",
        user_id,
        phrase_id,
        format.extension()
    );

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header(header::CONTENT_DISPOSITION, content_disposition.as_str())
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// `GET /audio/user/{user_id}/phrase/{phrase_id}/{audio_format}/link`: copy
/// the rendition to a short-lived served file and return its URL
#[tracing::instrument(skip(state), fields(operation = "audio_link"))]
pub async fn audio_link(
    State(state): State<Arc<AppState>>,
    ValidatedPath((user_id, phrase_id, audio_format)): ValidatedPath<(i64, i64, String)>,
) -> Result<impl IntoResponse, HttpAppError> {
    let link = state
        .audio
        .materialize(user_id, phrase_id, &audio_format)
        .await?;
    Ok(Json(link))
}
