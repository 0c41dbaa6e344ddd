//! Upload → convert → fetch → cleanup, wired with in-memory backends

use async_trait::async_trait;
use phonon_core::models::{
    AudioConversionMessage, AudioFormat, AudioRecord, CleanupMessage, ConversionStatus,
    NewAudioRecord,
};
use phonon_core::AppError;
use phonon_db::test_helpers::InMemoryAudioRecordStore;
use phonon_db::{AudioRecordStore, FinalizeOutcome, RecordStoreResult};
use phonon_processing::test_helpers::CopyConverter;
use phonon_services::{AudioService, AudioServiceConfig};
use phonon_storage::{keys, MemoryStorage, Storage, StorageReader};
use phonon_worker::{
    publish_json, CleanupHandler, ConsumerHandle, ConversionHandler, MemoryQueue, MessageOptions,
    Producer, RedeliveryPolicy,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONVERSION_TOPIC: &str = "audio_conversion";
const CLEANUP_TOPIC: &str = "janitor";

struct Pipeline {
    store: Arc<InMemoryAudioRecordStore>,
    storage: Arc<MemoryStorage>,
    queue: Arc<MemoryQueue>,
    converter: Arc<CopyConverter>,
    service: AudioService,
    conversion: ConversionHandler,
    cleanup: CleanupHandler,
}

fn pipeline(policy: RedeliveryPolicy) -> Pipeline {
    let store = Arc::new(InMemoryAudioRecordStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let queue = Arc::new(MemoryQueue::new(policy));
    let converter = Arc::new(CopyConverter::new(storage.clone(), AudioFormat::Wav));

    let service = AudioService::new(
        store.clone(),
        storage.clone(),
        queue.clone(),
        AudioServiceConfig::default(),
    );
    let conversion = ConversionHandler::new(converter.clone(), store.clone());
    let cleanup = CleanupHandler::new(storage.clone());

    Pipeline {
        store,
        storage,
        queue,
        converter,
        service,
        conversion,
        cleanup,
    }
}

fn upload(bytes: &[u8]) -> StorageReader {
    Box::pin(Cursor::new(bytes.to_vec()))
}

#[tokio::test]
async fn test_clip_wav_end_to_end() {
    let p = pipeline(RedeliveryPolicy::default());

    let record = p
        .service
        .ingest(7, 3, upload(b"RIFF....WAVE"), "clip.wav")
        .await
        .unwrap();
    assert_eq!(record.status, ConversionStatus::Ongoing);
    assert_eq!(record.original_format, AudioFormat::Wav);

    assert!(matches!(
        p.service.fetch(7, 3, "WAV").await.unwrap_err(),
        AppError::ProcessingInProgress(_)
    ));

    assert_eq!(p.queue.drain(CONVERSION_TOPIC, &p.conversion).await, 1);

    let record = p.store.get(7, 3).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Completed);
    assert!(!record.stored_uri.is_empty());

    assert_eq!(p.service.fetch(7, 3, "WAV").await.unwrap(), record.stored_uri);
    assert!(matches!(
        p.service.fetch(7, 3, "M4A").await.unwrap_err(),
        AppError::InvalidFormat(_)
    ));
}

#[tokio::test]
async fn test_second_ingest_for_same_key_rejected() {
    let p = pipeline(RedeliveryPolicy::default());
    p.service
        .ingest(7, 3, upload(b"a"), "clip.wav")
        .await
        .unwrap();

    let err = p
        .service
        .ingest(7, 3, upload(b"b"), "clip.wav")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_consumer() {
    let p = pipeline(RedeliveryPolicy::new(3));
    p.service
        .ingest(7, 3, upload(b"RIFF"), "clip.wav")
        .await
        .unwrap();

    // Garbage queued behind the real job
    p.queue
        .publish(CONVERSION_TOPIC, b"{not json".to_vec(), MessageOptions::default())
        .await
        .unwrap();
    p.queue
        .publish(
            CONVERSION_TOPIC,
            br#"{"user_id":"seven"}"#.to_vec(),
            MessageOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(p.queue.drain(CONVERSION_TOPIC, &p.conversion).await, 3);
    assert_eq!(p.queue.pending(CONVERSION_TOPIC).await, 0);

    let record = p.store.get(7, 3).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Completed);
    assert_eq!(p.store.len().await, 1);
}

#[tokio::test]
async fn test_redelivered_job_is_idempotent() {
    let p = pipeline(RedeliveryPolicy::default());
    let ingested = p
        .service
        .ingest(7, 3, upload(b"RIFF"), "clip.wav")
        .await
        .unwrap();

    let duplicate = AudioConversionMessage {
        user_id: 7,
        phrase_id: 3,
        input_uri: ingested.original_uri.clone(),
    };
    publish_json(
        p.queue.as_ref(),
        CONVERSION_TOPIC,
        &duplicate,
        MessageOptions::persistent(),
    )
    .await
    .unwrap();

    assert_eq!(p.queue.drain(CONVERSION_TOPIC, &p.conversion).await, 2);
    assert_eq!(p.converter.calls(), 2);

    let record = p.store.get(7, 3).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Completed);
    assert_eq!(
        record.stored_uri,
        keys::converted_key(&ingested.original_uri, AudioFormat::Wav)
    );
}

/// Record store whose `exists` never sees the other upload
struct RacingStore(Arc<InMemoryAudioRecordStore>);

#[async_trait]
impl AudioRecordStore for RacingStore {
    async fn exists(&self, _user_id: i64, _phrase_id: i64) -> RecordStoreResult<bool> {
        Ok(false)
    }

    async fn insert(&self, record: NewAudioRecord) -> RecordStoreResult<AudioRecord> {
        self.0.insert(record).await
    }

    async fn get(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<Option<AudioRecord>> {
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
async fn test_racing_uploads_convert_only_the_winner() {
    let p = pipeline(RedeliveryPolicy::default());
    let racing = AudioService::new(
        Arc::new(RacingStore(p.store.clone())),
        p.storage.clone(),
        p.queue.clone(),
        AudioServiceConfig::default(),
    );

    let winner = racing
        .ingest(7, 3, upload(b"WINNER"), "a.wav")
        .await
        .unwrap();
    let err = racing
        .ingest(7, 3, upload(b"LOSER"), "b.wav")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyExists(_)));

    // Both jobs were queued; the loser's must not touch the record
    assert_eq!(p.queue.drain(CONVERSION_TOPIC, &p.conversion).await, 2);

    let record = p.store.get(7, 3).await.unwrap().unwrap();
    assert_eq!(record.status, ConversionStatus::Completed);
    assert_eq!(record.original_uri, winner.original_uri);
    assert_eq!(
        p.storage.get(&record.original_uri).await.unwrap(),
        b"WINNER".to_vec()
    );
    assert_eq!(
        p.storage.get(&record.stored_uri).await.unwrap(),
        b"WINNER".to_vec()
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_when_policy_allows() {
    let p = pipeline(RedeliveryPolicy::new(1));
    p.service
        .ingest(7, 3, upload(b"RIFF"), "clip.wav")
        .await
        .unwrap();

    p.converter.set_failing(true);
    p.queue.drain(CONVERSION_TOPIC, &p.conversion).await;
    assert_eq!(
        p.store.get(7, 3).await.unwrap().unwrap().status,
        ConversionStatus::Ongoing
    );

    p.converter.set_failing(false);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(p.queue.drain(CONVERSION_TOPIC, &p.conversion).await, 1);
    assert_eq!(
        p.store.get(7, 3).await.unwrap().unwrap().status,
        ConversionStatus::Completed
    );
}

#[tokio::test]
async fn test_failed_conversion_not_retried_by_default() {
    let p = pipeline(RedeliveryPolicy::default());
    p.service
        .ingest(7, 3, upload(b"RIFF"), "clip.wav")
        .await
        .unwrap();

    p.converter.set_failing(true);
    p.queue.drain(CONVERSION_TOPIC, &p.conversion).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(p.queue.pending(CONVERSION_TOPIC).await, 0);
    assert!(matches!(
        p.service.fetch(7, 3, "wav").await.unwrap_err(),
        AppError::ProcessingInProgress(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_served_rendition_cleaned_up_after_ttl() {
    let p = pipeline(RedeliveryPolicy::default());
    p.service
        .ingest(7, 3, upload(b"RIFF"), "clip.wav")
        .await
        .unwrap();
    p.queue.drain(CONVERSION_TOPIC, &p.conversion).await;
    let stored_uri = p.store.get(7, 3).await.unwrap().unwrap().stored_uri;

    let link = p.service.materialize(7, 3, "wav").await.unwrap();
    let served_key = link.url.trim_start_matches("memory://").to_string();
    assert!(p.storage.exists(&served_key).await.unwrap());
    assert_eq!(p.queue.pending(CLEANUP_TOPIC).await, 0);

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(p.queue.drain(CLEANUP_TOPIC, &p.cleanup).await, 1);
    assert!(!p.storage.exists(&served_key).await.unwrap());
    assert!(p.storage.exists(&stored_uri).await.unwrap());
}

#[tokio::test]
async fn test_cleanup_of_missing_path_keeps_janitor_running() {
    let p = pipeline(RedeliveryPolicy::default());
    let cancel = CancellationToken::new();
    let janitor = ConsumerHandle::spawn(
        p.queue.clone(),
        CLEANUP_TOPIC,
        Arc::new(CleanupHandler::new(p.storage.clone())),
        cancel.clone(),
    );

    for uri in ["served/never-existed.wav", "served/other.wav"] {
        publish_json(
            p.queue.as_ref(),
            CLEANUP_TOPIC,
            &CleanupMessage {
                uri: uri.to_string(),
            },
            MessageOptions::persistent(),
        )
        .await
        .unwrap();
    }

    p.storage
        .upload_with_key("served/late.wav", b"RIFF".to_vec(), "audio/wav")
        .await
        .unwrap();
    publish_json(
        p.queue.as_ref(),
        CLEANUP_TOPIC,
        &CleanupMessage {
            uri: "served/late.wav".to_string(),
        },
        MessageOptions::persistent(),
    )
    .await
    .unwrap();

    for _ in 0..100 {
        if !p.storage.exists("served/late.wav").await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!p.storage.exists("served/late.wav").await.unwrap());

    janitor.shutdown(Duration::from_secs(5)).await.unwrap();
}
