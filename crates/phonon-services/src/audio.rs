//! Audio ingestion and retrieval
//!
//! [`AudioService::ingest`] stores an upload, queues its conversion and
//! creates the `Ongoing` record. [`AudioService::fetch`] releases the stored
//! URI once the record is `Completed` in the requested format.

use phonon_core::models::{
    AudioConversionMessage, AudioFormat, AudioRecord, CleanupMessage, NewAudioRecord,
    ServedAudioLink,
};
use phonon_core::{AppError, Config};
use phonon_db::AudioRecordStore;
use phonon_storage::{keys, Storage, StorageReader};
use phonon_worker::{publish_json, MessageOptions, Producer};
use std::sync::Arc;
use std::time::Duration;

/// Topic names and lifetimes used by [`AudioService`]
#[derive(Debug, Clone)]
pub struct AudioServiceConfig {
    pub conversion_topic: String,
    pub cleanup_topic: String,
    /// How long a served rendition lives before the janitor deletes it
    pub served_file_ttl: Duration,
}

impl AudioServiceConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            conversion_topic: config.conversion_topic.clone(),
            cleanup_topic: config.cleanup_topic.clone(),
            served_file_ttl: Duration::from_secs(config.served_file_ttl_secs),
        }
    }
}

impl Default for AudioServiceConfig {
    fn default() -> Self {
        Self {
            conversion_topic: "audio_conversion".to_string(),
            cleanup_topic: "janitor".to_string(),
            served_file_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct AudioService {
    store: Arc<dyn AudioRecordStore>,
    storage: Arc<dyn Storage>,
    producer: Arc<dyn Producer>,
    config: AudioServiceConfig,
}

impl AudioService {
    pub fn new(
        store: Arc<dyn AudioRecordStore>,
        storage: Arc<dyn Storage>,
        producer: Arc<dyn Producer>,
        config: AudioServiceConfig,
    ) -> Self {
        Self {
            store,
            storage,
            producer,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Accept an upload for `(user_id, phrase_id)`.
    ///
    /// Order: blob write, then conversion publish, then record insert. A
    /// failure stops the sequence; an already written blob is left in place.
    #[tracing::instrument(skip(self, reader))]
    pub async fn ingest(
        &self,
        user_id: i64,
        phrase_id: i64,
        reader: StorageReader,
        filename: &str,
    ) -> Result<AudioRecord, AppError> {
        if user_id <= 0 || phrase_id <= 0 {
            return Err(AppError::InvalidInput(format!(
                "user_id and phrase_id must be positive (got {}, {})",
                user_id, phrase_id
            )));
        }

        if self.store.exists(user_id, phrase_id).await? {
            return Err(AppError::AlreadyExists(format!(
                "Audio already uploaded for user {} phrase {}",
                user_id, phrase_id
            )));
        }

        let format = AudioFormat::from_filename(filename).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Unsupported audio file '{}': expected .wav or .m4a",
                filename
            ))
        })?;

        let input_uri = self
            .storage
            .save(user_id, phrase_id, format, reader)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to store uploaded audio");
                AppError::StorageFailure(e.to_string())
            })?;

        let job = AudioConversionMessage {
            user_id,
            phrase_id,
            input_uri: input_uri.clone(),
        };
        let message_id = publish_json(
            self.producer.as_ref(),
            &self.config.conversion_topic,
            &job,
            MessageOptions::persistent(),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, uri = %input_uri, "Failed to queue conversion");
            AppError::from(e)
        })?;

        let record = self
            .store
            .insert(NewAudioRecord {
                user_id,
                phrase_id,
                original_filename: filename.to_string(),
                original_format: format,
                original_uri: input_uri.clone(),
            })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, uri = %input_uri, "Failed to create audio record");
                AppError::from(e)
            })?;

        tracing::info!(
            uri = %input_uri,
            format = %format,
            message_id = %message_id,
            "Audio ingested, conversion queued"
        );

        Ok(record)
    }

    /// Resolve the stored URI for a completed record.
    ///
    /// Checks, first failure wins: record exists, record is completed,
    /// requested format matches the stored format.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(
        &self,
        user_id: i64,
        phrase_id: i64,
        requested_format: &str,
    ) -> Result<String, AppError> {
        let record = self
            .store
            .get(user_id, phrase_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No audio for user {} phrase {}",
                    user_id, phrase_id
                ))
            })?;

        if !record.is_completed() {
            return Err(AppError::ProcessingInProgress(format!(
                "Audio for user {} phrase {} is still being converted",
                user_id, phrase_id
            )));
        }

        let requested: AudioFormat = requested_format.parse()?;
        match record.stored_format() {
            Some(stored) if stored == requested => Ok(record.stored_uri),
            Some(stored) => Err(AppError::InvalidFormat(format!(
                "Audio is stored as {}, not {}",
                stored, requested
            ))),
            None => Err(AppError::InvalidFormat(format!(
                "Stored audio has no recognised format: {}",
                record.stored_uri
            ))),
        }
    }

    /// Copy the stored rendition to a short-lived `served/` key, return a link
    /// to it, and schedule its deletion after the served file TTL.
    #[tracing::instrument(skip(self))]
    pub async fn materialize(
        &self,
        user_id: i64,
        phrase_id: i64,
        requested_format: &str,
    ) -> Result<ServedAudioLink, AppError> {
        let stored_uri = self.fetch(user_id, phrase_id, requested_format).await?;
        let format = AudioFormat::from_filename(&stored_uri)
            .ok_or_else(|| AppError::Internal(format!("Unrecognised stored URI {}", stored_uri)))?;

        let served_key = self
            .storage
            .copy(&stored_uri, &keys::served_key(format))
            .await?;
        let url = self
            .storage
            .public_url(&served_key, self.config.served_file_ttl)
            .await?;

        self.schedule_cleanup(&served_key).await;

        Ok(ServedAudioLink {
            url,
            expires_in_secs: self.config.served_file_ttl.as_secs(),
        })
    }

    /// Queue deletion of a served blob once its TTL has passed. Failures are
    /// logged only; the caller already has its link.
    pub async fn schedule_cleanup(&self, uri: &str) {
        let message = CleanupMessage {
            uri: uri.to_string(),
        };
        let options = MessageOptions::persistent().with_delay(self.config.served_file_ttl);

        if let Err(e) = publish_json(
            self.producer.as_ref(),
            &self.config.cleanup_topic,
            &message,
            options,
        )
        .await
        {
            tracing::warn!(error = %e, uri = %uri, "Failed to schedule served file cleanup");
        }
    }

    /// Close the queue producer, then the record store
    pub async fn shutdown(&self) {
        self.producer.close().await;
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonon_core::models::ConversionStatus;
    use phonon_db::test_helpers::InMemoryAudioRecordStore;
    use phonon_db::{FinalizeOutcome, RecordStoreResult};
    use phonon_storage::MemoryStorage;
    use phonon_worker::MemoryQueue;
    use std::io::Cursor;

    struct Fixture {
        store: Arc<InMemoryAudioRecordStore>,
        storage: Arc<MemoryStorage>,
        queue: Arc<MemoryQueue>,
        service: AudioService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAudioRecordStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(MemoryQueue::default());
        let service = AudioService::new(
            store.clone(),
            storage.clone(),
            queue.clone(),
            AudioServiceConfig::default(),
        );
        Fixture {
            store,
            storage,
            queue,
            service,
        }
    }

    fn body(bytes: &[u8]) -> StorageReader {
        Box::pin(Cursor::new(bytes.to_vec()))
    }

    #[tokio::test]
    async fn test_ingest_creates_ongoing_record_and_job() {
        let f = fixture();
        let record = f
            .service
            .ingest(7, 3, body(b"RIFF"), "clip.wav")
            .await
            .unwrap();

        assert_eq!(record.status, ConversionStatus::Ongoing);
        assert_eq!(record.original_format, AudioFormat::Wav);
        assert!(record.stored_uri.is_empty());
        assert_eq!(
            f.storage.get(&record.original_uri).await.unwrap(),
            b"RIFF".to_vec()
        );
        assert_eq!(f.queue.pending("audio_conversion").await, 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_unsupported_extension() {
        let f = fixture();
        for name in ["clip.mp3", "clip", "clip."] {
            let err = f.service.ingest(1, 1, body(b"x"), name).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{}", name);
        }
        assert!(f.storage.is_empty().await);
        assert_eq!(f.queue.pending("audio_conversion").await, 0);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_positive_keys() {
        let f = fixture();
        let err = f
            .service
            .ingest(0, 3, body(b"x"), "clip.wav")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ingest_duplicate_key() {
        let f = fixture();
        f.service
            .ingest(7, 3, body(b"RIFF"), "clip.wav")
            .await
            .unwrap();
        let err = f
            .service
            .ingest(7, 3, body(b"RIFF"), "again.m4a")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(f.queue.pending("audio_conversion").await, 1);
    }

    /// Lets every `exists` check pass, as when two uploads race
    struct RacingStore(InMemoryAudioRecordStore);

    #[async_trait::async_trait]
    impl AudioRecordStore for RacingStore {
        async fn exists(&self, _user_id: i64, _phrase_id: i64) -> RecordStoreResult<bool> {
            Ok(false)
        }

        async fn insert(&self, record: NewAudioRecord) -> RecordStoreResult<AudioRecord> {
            self.0.insert(record).await
        }

        async fn get(
            &self,
            user_id: i64,
            phrase_id: i64,
        ) -> RecordStoreResult<Option<AudioRecord>> {
            self.0.get(user_id, phrase_id).await
        }

        async fn set_converted(
            &self,
            user_id: i64,
            phrase_id: i64,
            input_uri: &str,
            stored_uri: &str,
        ) -> RecordStoreResult<FinalizeOutcome> {
            self.0
                .set_converted(user_id, phrase_id, input_uri, stored_uri)
                .await
        }

        async fn close(&self) {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_after_exists_passed_keeps_first_upload() {
        let store = Arc::new(RacingStore(InMemoryAudioRecordStore::new()));
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(MemoryQueue::default());
        let service = AudioService::new(
            store.clone(),
            storage.clone(),
            queue.clone(),
            AudioServiceConfig::default(),
        );

        let winner = service
            .ingest(7, 3, body(b"WINNER"), "a.wav")
            .await
            .unwrap();
        let err = service
            .ingest(7, 3, body(b"LOSER"), "b.wav")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));

        let record = store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.original_filename, "a.wav");
        assert_eq!(record.original_uri, winner.original_uri);
        assert_eq!(
            storage.get(&record.original_uri).await.unwrap(),
            b"WINNER".to_vec()
        );
    }

    #[tokio::test]
    async fn test_ingest_queue_closed_creates_no_record() {
        let f = fixture();
        f.queue.close().await;

        let err = f
            .service
            .ingest(7, 3, body(b"RIFF"), "clip.wav")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::QueueUnavailable(_)));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_checks_in_order() {
        let f = fixture();
        let err = f.service.fetch(7, 3, "wav").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let record = f
            .service
            .ingest(7, 3, body(b"RIFF"), "clip.wav")
            .await
            .unwrap();
        let err = f.service.fetch(7, 3, "mp3").await.unwrap_err();
        assert!(matches!(err, AppError::ProcessingInProgress(_)));

        f.store
            .set_converted(7, 3, &record.original_uri, "audio/7/3/stored.wav")
            .await
            .unwrap();
        assert_eq!(
            f.service.fetch(7, 3, "WAV").await.unwrap(),
            "audio/7/3/stored.wav"
        );
        assert!(matches!(
            f.service.fetch(7, 3, "M4A").await.unwrap_err(),
            AppError::InvalidFormat(_)
        ));
        assert!(matches!(
            f.service.fetch(7, 3, "flac").await.unwrap_err(),
            AppError::InvalidFormat(_)
        ));
    }

    #[tokio::test]
    async fn test_materialize_copies_and_schedules_cleanup() {
        let f = fixture();
        f.storage
            .upload_with_key("audio/7/3/stored.wav", b"RIFF".to_vec(), "audio/wav")
            .await
            .unwrap();
        let mut record = AudioRecord::ongoing(NewAudioRecord {
            user_id: 7,
            phrase_id: 3,
            original_filename: "clip.wav".to_string(),
            original_format: AudioFormat::Wav,
            original_uri: "audio/7/3/original.wav".to_string(),
        });
        record.status = ConversionStatus::Completed;
        record.stored_uri = "audio/7/3/stored.wav".to_string();
        f.store.put(record).await;

        let link = f.service.materialize(7, 3, "wav").await.unwrap();

        assert!(link.url.starts_with("memory://served/"));
        assert!(link.url.ends_with(".wav"));
        assert_eq!(link.expires_in_secs, 300);
        assert_eq!(f.storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_cleanup_publish_failure_is_swallowed() {
        let f = fixture();
        f.queue.close().await;
        f.service.schedule_cleanup("served/x.wav").await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue_then_store() {
        let f = fixture();
        f.service.shutdown().await;

        assert!(f.store.is_closed());
        let err = f
            .service
            .ingest(7, 3, body(b"RIFF"), "clip.wav")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersistenceFailure(_)));
    }
}
