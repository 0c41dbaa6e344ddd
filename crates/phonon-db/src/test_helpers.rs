//! In-memory record store for tests
//!
//! Mirrors the PostgreSQL repository's semantics (unique key, finalize only
//! from `Ongoing`) without a database.

use async_trait::async_trait;
use chrono::Utc;
use phonon_core::models::{AudioRecord, ConversionStatus, NewAudioRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::{AudioRecordStore, FinalizeOutcome, RecordStoreError, RecordStoreResult};

#[derive(Clone, Default)]
pub struct InMemoryAudioRecordStore {
    records: Arc<Mutex<HashMap<(i64, i64), AudioRecord>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryAudioRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing `insert`
    pub async fn put(&self, record: AudioRecord) {
        self.records
            .lock()
            .await
            .insert((record.user_id, record.phrase_id), record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> RecordStoreResult<()> {
        if self.is_closed() {
            Err(RecordStoreError::Unavailable("store closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AudioRecordStore for InMemoryAudioRecordStore {
    async fn exists(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<bool> {
        self.check_open()?;
        Ok(self
            .records
            .lock()
            .await
            .contains_key(&(user_id, phrase_id)))
    }

    async fn insert(&self, record: NewAudioRecord) -> RecordStoreResult<AudioRecord> {
        self.check_open()?;
        let mut records = self.records.lock().await;
        let key = (record.user_id, record.phrase_id);
        if records.contains_key(&key) {
            return Err(RecordStoreError::AlreadyExists {
                user_id: key.0,
                phrase_id: key.1,
            });
        }
        let created = AudioRecord::ongoing(record);
        records.insert(key, created.clone());
        Ok(created)
    }

    async fn get(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<Option<AudioRecord>> {
        self.check_open()?;
        Ok(self
            .records
            .lock()
            .await
            .get(&(user_id, phrase_id))
            .cloned())
    }

    async fn set_converted(
        &self,
        user_id: i64,
        phrase_id: i64,
        input_uri: &str,
        stored_uri: &str,
    ) -> RecordStoreResult<FinalizeOutcome> {
        self.check_open()?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(user_id, phrase_id))
            .ok_or(RecordStoreError::NotFound { user_id, phrase_id })?;

        if record.original_uri != input_uri {
            return Ok(FinalizeOutcome::Superseded);
        }

        match record.status {
            ConversionStatus::Completed => Ok(FinalizeOutcome::AlreadyCompleted),
            ConversionStatus::Deleted => Ok(FinalizeOutcome::Deleted),
            ConversionStatus::Ongoing => {
                record.stored_uri = stored_uri.to_string();
                record.status = ConversionStatus::Completed;
                record.updated_at = Utc::now();
                Ok(FinalizeOutcome::Applied)
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
