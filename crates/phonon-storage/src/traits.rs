//! Storage abstraction trait
//!
//! This module defines the Storage trait that all blob store backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use phonon_core::models::AudioFormat;
use phonon_core::AppError;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::NotFound(err.to_string()),
            StorageError::InvalidKey(_) => AppError::InvalidInput(err.to_string()),
            _ => AppError::StorageFailure(err.to_string()),
        }
    }
}

/// Byte source consumed by [`Storage::save`]
pub type StorageReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Chunked blob contents returned by [`Storage::download_stream`]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Durable byte storage addressed by an opaque URI (the storage key).
///
/// **Key format:** see the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist an uploaded original and return its URI.
    ///
    /// The reader is consumed until EOF without buffering the whole file.
    async fn save(
        &self,
        user_id: i64,
        phrase_id: i64,
        format: AudioFormat,
        reader: StorageReader,
    ) -> StorageResult<String>;

    /// Write data to a specific key, replacing any existing blob.
    /// Returns the key.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Download a blob by its key
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Download a blob as a stream of chunks
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete a blob. Returns `StorageError::NotFound` if nothing is stored
    /// under the key.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Check if a blob exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Copy a blob from one key to another. Returns the destination key.
    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<String>;

    /// URL a client can fetch the blob from directly.
    ///
    /// Backends without signed URLs ignore `expires_in`.
    async fn public_url(&self, storage_key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
