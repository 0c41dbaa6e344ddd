//! Conversion Worker: finalizes records once their audio is converted

use async_trait::async_trait;
use phonon_core::models::{AudioConversionMessage, JobPayload};
use phonon_core::{JobError, JobResultExt};
use phonon_db::{AudioRecordStore, FinalizeOutcome, RecordStoreError};
use phonon_processing::{ConversionError, FormatConverter};
use std::sync::Arc;

use crate::queue::{Message, MessageHandler};

pub struct ConversionHandler {
    converter: Arc<dyn FormatConverter>,
    store: Arc<dyn AudioRecordStore>,
}

impl ConversionHandler {
    pub fn new(converter: Arc<dyn FormatConverter>, store: Arc<dyn AudioRecordStore>) -> Self {
        Self { converter, store }
    }

    #[tracing::instrument(
        skip(self, job),
        fields(user_id = job.user_id, phrase_id = job.phrase_id, uri = %job.input_uri)
    )]
    async fn process(&self, job: &AudioConversionMessage) -> Result<(), JobError> {
        let stored_uri = match self.converter.convert(&job.input_uri).await {
            Ok(uri) => uri,
            Err(ConversionError::InputNotFound(uri)) => {
                tracing::error!(uri = %uri, "Input blob missing, conversion abandoned");
                return Err(JobError::permanent(anyhow::anyhow!(
                    "input blob {} not found",
                    uri
                )));
            }
            Err(e) => {
                tracing::error!(error = %e, "Audio conversion failed");
                return Err(JobError::transient(e));
            }
        };

        match self
            .store
            .set_converted(job.user_id, job.phrase_id, &job.input_uri, &stored_uri)
            .await
        {
            Ok(FinalizeOutcome::Applied) => {
                tracing::info!(stored_uri = %stored_uri, "Audio record completed");
                Ok(())
            }
            Ok(FinalizeOutcome::AlreadyCompleted) => {
                tracing::info!("Audio record already completed, skipping");
                Ok(())
            }
            Ok(FinalizeOutcome::Deleted) => {
                tracing::warn!("Audio record deleted, not finalizing");
                Ok(())
            }
            Ok(FinalizeOutcome::Superseded) => {
                tracing::warn!(
                    stored_uri = %stored_uri,
                    "Converted input is not the record's upload, discarding"
                );
                Ok(())
            }
            Err(RecordStoreError::NotFound { .. }) => {
                tracing::warn!("No audio record for converted job, discarding");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to finalize audio record");
                Err(JobError::transient(e))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ConversionHandler {
    async fn handle(&self, message: &Message) -> Result<(), JobError> {
        let job = AudioConversionMessage::decode(&message.value)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    message_id = ?message.id,
                    "Malformed conversion message"
                );
                anyhow::Error::from(e)
            })
            .permanent()?;

        self.process(&job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonon_core::models::{AudioFormat, AudioRecord, ConversionStatus, NewAudioRecord};
    use phonon_db::test_helpers::InMemoryAudioRecordStore;
    use phonon_processing::test_helpers::CopyConverter;
    use phonon_storage::{MemoryStorage, Storage};

    struct Fixture {
        storage: Arc<MemoryStorage>,
        store: Arc<InMemoryAudioRecordStore>,
        converter: Arc<CopyConverter>,
        handler: ConversionHandler,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(InMemoryAudioRecordStore::new());
        let converter = Arc::new(CopyConverter::new(storage.clone(), AudioFormat::Wav));
        let handler = ConversionHandler::new(converter.clone(), store.clone());

        storage
            .upload_with_key("audio/7/3/original.wav", b"RIFF".to_vec(), "audio/wav")
            .await
            .unwrap();
        store
            .insert(NewAudioRecord {
                user_id: 7,
                phrase_id: 3,
                original_filename: "clip.wav".to_string(),
                original_format: AudioFormat::Wav,
                original_uri: "audio/7/3/original.wav".to_string(),
            })
            .await
            .unwrap();

        Fixture {
            storage,
            store,
            converter,
            handler,
        }
    }

    fn message(value: &[u8]) -> Message {
        Message {
            value: value.to_vec(),
            id: Some("m-1".to_string()),
            content_type: "application/json".to_string(),
            correlation_id: None,
            delivery_count: 1,
        }
    }

    fn job(user_id: i64, phrase_id: i64) -> Message {
        job_for(user_id, phrase_id, "audio/7/3/original.wav")
    }

    fn job_for(user_id: i64, phrase_id: i64, input_uri: &str) -> Message {
        let payload = AudioConversionMessage {
            user_id,
            phrase_id,
            input_uri: input_uri.to_string(),
        };
        message(&payload.encode().unwrap())
    }

    #[tokio::test]
    async fn test_completes_record() {
        let f = fixture().await;
        f.handler.handle(&job(7, 3)).await.unwrap();

        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.status, ConversionStatus::Completed);
        assert_eq!(record.stored_uri, "audio/7/3/stored.wav");
        assert!(f.storage.exists("audio/7/3/stored.wav").await.unwrap());
    }

    #[tokio::test]
    async fn test_redelivered_job_leaves_same_state() {
        let f = fixture().await;
        f.handler.handle(&job(7, 3)).await.unwrap();
        let first = f.store.get(7, 3).await.unwrap().unwrap();

        f.handler.handle(&job(7, 3)).await.unwrap();
        let second = f.store.get(7, 3).await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.stored_uri, second.stored_uri);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_malformed_message_is_permanent() {
        let f = fixture().await;
        let err = f.handler.handle(&message(b"not json")).await.unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(f.converter.calls(), 0);
        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.status, ConversionStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_missing_record_is_discarded() {
        let f = fixture().await;
        f.handler.handle(&job(8, 1)).await.unwrap();

        assert!(f.store.get(8, 1).await.unwrap().is_none());
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_conversion_failure_leaves_record_ongoing() {
        let f = fixture().await;
        f.converter.set_failing(true);

        let err = f.handler.handle(&job(7, 3)).await.unwrap_err();
        assert!(err.is_transient());

        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.status, ConversionStatus::Ongoing);
        assert!(record.stored_uri.is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_is_permanent() {
        let f = fixture().await;
        f.storage.delete("audio/7/3/original.wav").await.unwrap();

        let err = f.handler.handle(&job(7, 3)).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_deleted_record_not_finalized() {
        let f = fixture().await;
        let mut record: AudioRecord = f.store.get(7, 3).await.unwrap().unwrap();
        record.status = ConversionStatus::Deleted;
        f.store.put(record).await;

        f.handler.handle(&job(7, 3)).await.unwrap();
        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.status, ConversionStatus::Deleted);
        assert!(record.stored_uri.is_empty());
    }

    #[tokio::test]
    async fn test_job_for_rejected_upload_leaves_record() {
        let f = fixture().await;
        f.storage
            .upload_with_key("audio/7/3/loser/original.wav", b"LOSER".to_vec(), "audio/wav")
            .await
            .unwrap();

        f.handler
            .handle(&job_for(7, 3, "audio/7/3/loser/original.wav"))
            .await
            .unwrap();

        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.status, ConversionStatus::Ongoing);
        assert!(record.stored_uri.is_empty());

        f.handler.handle(&job(7, 3)).await.unwrap();
        let record = f.store.get(7, 3).await.unwrap().unwrap();
        assert_eq!(record.stored_uri, "audio/7/3/stored.wav");
        assert_eq!(f.storage.get("audio/7/3/stored.wav").await.unwrap(), b"RIFF");
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let f = fixture().await;
        f.store.close().await;

        let err = f.handler.handle(&job(7, 3)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
