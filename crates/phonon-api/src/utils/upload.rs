//! Helpers for the multipart upload handler

use crate::error::HttpAppError;
use axum::extract::Multipart;
use phonon_core::AppError;

/// Multipart field carrying the audio file
pub const AUDIO_FILE_FIELD: &str = "audio_file";

const MAX_FILENAME_LENGTH: usize = 255;

/// An uploaded file read from a multipart body
#[derive(Debug)]
pub struct UploadedFile {
    pub data: Vec<u8>,
    pub filename: String,
}

/// Read the single `audio_file` field from a multipart body. Other fields are
/// ignored; a second `audio_file` field is rejected.
pub async fn extract_audio_file(
    mut multipart: Multipart,
    max_size: usize,
) -> Result<UploadedFile, HttpAppError> {
    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(AUDIO_FILE_FIELD) {
            continue;
        }
        if upload.is_some() {
            return Err(AppError::InvalidInput(format!(
                "Multiple '{}' fields are not allowed",
                AUDIO_FILE_FIELD
            ))
            .into());
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        validate_file_size(data.len(), max_size)?;

        upload = Some(UploadedFile {
            data: data.to_vec(),
            filename: sanitize_filename(&filename)?,
        });
    }

    upload.ok_or_else(|| {
        AppError::InvalidInput(format!("Missing '{}' field", AUDIO_FILE_FIELD)).into()
    })
}

pub fn validate_file_size(file_size: usize, max_size: usize) -> Result<(), AppError> {
    if file_size == 0 {
        return Err(AppError::InvalidInput("File is empty".to_string()));
    }
    if file_size > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File size exceeds maximum allowed size of {} MB",
            max_size / 1024 / 1024
        )));
    }
    Ok(())
}

/// Keep only the final path segment and replace characters outside
/// `[A-Za-z0-9._-]`. The extension is preserved.
pub fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    if name.is_empty() {
        return Err(AppError::InvalidInput("Missing file name".to_string()));
    }
    if name.contains("..") {
        return Err(AppError::InvalidInput(
            "Filename contains invalid path traversal".to_string(),
        ));
    }

    let sanitized: String = name
        .chars()
        .rev()
        .take(MAX_FILENAME_LENGTH)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_extension() {
        assert_eq!(sanitize_filename("my clip.WAV").unwrap(), "my_clip.WAV");
        assert_eq!(sanitize_filename("C:\\rec\\take.m4a").unwrap(), "take.m4a");
        assert_eq!(sanitize_filename("dir/clip.wav").unwrap(), "clip.wav");
    }

    #[test]
    fn test_sanitize_long_name_keeps_tail() {
        let long = format!("{}.wav", "a".repeat(400));
        let sanitized = sanitize_filename(&long).unwrap();
        assert_eq!(sanitized.len(), MAX_FILENAME_LENGTH);
        assert!(sanitized.ends_with(".wav"));
    }

    #[test]
    fn test_sanitize_rejects_traversal_and_empty() {
        assert!(sanitize_filename("..wav").is_err());
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(10, 100).is_ok());
        assert!(matches!(
            validate_file_size(101, 100),
            Err(AppError::PayloadTooLarge(_))
        ));
        assert!(matches!(
            validate_file_size(0, 100),
            Err(AppError::InvalidInput(_))
        ));
    }
}
