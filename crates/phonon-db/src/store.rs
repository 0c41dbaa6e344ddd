//! Record Store contract
//!
//! Durable keyed storage for [`AudioRecord`]s. The `(user_id, phrase_id)` key
//! is unique: `insert` is the authoritative duplicate check, so two concurrent
//! ingestions for the same key cannot both succeed.

use async_trait::async_trait;
use phonon_core::models::{AudioRecord, NewAudioRecord};
use phonon_core::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Audio record already exists for user {user_id} phrase {phrase_id}")]
    AlreadyExists { user_id: i64, phrase_id: i64 },

    #[error("Audio record not found for user {user_id} phrase {phrase_id}")]
    NotFound { user_id: i64, phrase_id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

impl From<RecordStoreError> for AppError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::AlreadyExists { .. } => AppError::AlreadyExists(err.to_string()),
            RecordStoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            RecordStoreError::Database(_) | RecordStoreError::Unavailable(_) => {
                AppError::PersistenceFailure(err.to_string())
            }
        }
    }
}

/// Result of finalizing a record after conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// `Ongoing -> Completed` applied with the new stored URI
    Applied,
    /// Record was already `Completed`; left untouched
    AlreadyCompleted,
    /// Record is `Deleted`; left untouched
    Deleted,
    /// Record belongs to a different upload than the converted input; left
    /// untouched
    Superseded,
}

#[async_trait]
pub trait AudioRecordStore: Send + Sync {
    async fn exists(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<bool>;

    /// Create an `Ongoing` record. Fails with `AlreadyExists` if the key is taken.
    async fn insert(&self, record: NewAudioRecord) -> RecordStoreResult<AudioRecord>;

    async fn get(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<Option<AudioRecord>>;

    /// Move an `Ongoing` record to `Completed` with `stored_uri`.
    ///
    /// Only `Ongoing` records whose `original_uri` equals `input_uri` are
    /// modified, which makes redelivered conversion jobs and jobs from a
    /// rejected duplicate upload harmless. A missing record is `NotFound`.
    async fn set_converted(
        &self,
        user_id: i64,
        phrase_id: i64,
        input_uri: &str,
        stored_uri: &str,
    ) -> RecordStoreResult<FinalizeOutcome>;

    /// Release connections. Later calls fail.
    async fn close(&self);
}
