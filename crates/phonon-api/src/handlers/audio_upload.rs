use crate::error::{HttpAppError, ValidatedPath};
use crate::state::AppState;
use crate::utils::upload::extract_audio_file;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use phonon_core::models::UploadResponse;
use phonon_storage::StorageReader;
use std::io::Cursor;
use std::sync::Arc;

/// `POST /audio/user/{user_id}/phrase/{phrase_id}` with multipart field
/// `audio_file`
#[tracing::instrument(skip(state, multipart), fields(operation = "upload_audio"))]
pub async fn upload_audio(
    State(state): State<Arc<AppState>>,
    ValidatedPath((user_id, phrase_id)): ValidatedPath<(i64, i64)>,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let file = extract_audio_file(multipart, state.config.max_upload_size_bytes).await?;
    let size = file.data.len();
    let reader: StorageReader = Box::pin(Cursor::new(file.data));

    state
        .audio
        .ingest(user_id, phrase_id, reader, &file.filename)
        .await?;

    tracing::info!(
        user_id,
        phrase_id,
        filename = %file.filename,
        size,
        "Audio upload accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Audio uploaded successfully".to_string(),
        }),
    ))
}
