//! Format Converter contract

use async_trait::async_trait;
use phonon_core::models::AudioFormat;
use phonon_core::AppError;
use phonon_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Input blob not found: {0}")]
    InputNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("FFmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConversionResult<T> = Result<T, ConversionError>;

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Storage(_) => AppError::StorageFailure(err.to_string()),
            _ => AppError::ConversionFailed(err.to_string()),
        }
    }
}

/// Converts a stored blob into the storage format.
///
/// Implementations read the blob at `input_uri`, write the converted blob to
/// the Blob Store and return its URI. The URI's extension names the target
/// format.
#[async_trait]
pub trait FormatConverter: Send + Sync {
    async fn convert(&self, input_uri: &str) -> ConversionResult<String>;

    /// Format every converted blob is written in
    fn target_format(&self) -> AudioFormat;
}
