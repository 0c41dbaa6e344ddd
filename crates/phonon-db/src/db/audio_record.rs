use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

use phonon_core::models::{AudioRecord, ConversionStatus, NewAudioRecord};

use crate::store::{AudioRecordStore, FinalizeOutcome, RecordStoreError, RecordStoreResult};

const RECORD_COLUMNS: &str = r#"
    user_id,
    phrase_id,
    original_filename,
    original_format,
    original_uri,
    stored_uri,
    status,
    created_at,
    updated_at
"#;

#[derive(Clone)]
pub struct PgAudioRecordRepository {
    pool: PgPool,
}

impl PgAudioRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl AudioRecordStore for PgAudioRecordRepository {
    #[tracing::instrument(skip(self))]
    async fn exists(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM audio_records WHERE user_id = $1 AND phrase_id = $2)",
        )
        .bind(user_id)
        .bind(phrase_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip(self, record), fields(user_id = record.user_id, phrase_id = record.phrase_id))]
    async fn insert(&self, record: NewAudioRecord) -> RecordStoreResult<AudioRecord> {
        let sql = format!(
            r#"
            INSERT INTO audio_records (
                user_id, phrase_id, original_filename, original_format, original_uri, status
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        let inserted = sqlx::query_as::<Postgres, AudioRecord>(&sql)
            .bind(record.user_id)
            .bind(record.phrase_id)
            .bind(&record.original_filename)
            .bind(record.original_format.extension())
            .bind(&record.original_uri)
            .bind(ConversionStatus::Ongoing)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RecordStoreError::AlreadyExists {
                        user_id: record.user_id,
                        phrase_id: record.phrase_id,
                    }
                } else {
                    tracing::error!(error = %e, "Failed to insert audio record");
                    RecordStoreError::Database(e)
                }
            })?;

        tracing::info!(
            user_id = inserted.user_id,
            phrase_id = inserted.phrase_id,
            format = %inserted.original_format,
            "Audio record created"
        );

        Ok(inserted)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, user_id: i64, phrase_id: i64) -> RecordStoreResult<Option<AudioRecord>> {
        let sql = format!(
            "SELECT {} FROM audio_records WHERE user_id = $1 AND phrase_id = $2",
            RECORD_COLUMNS
        );

        let record = sqlx::query_as::<Postgres, AudioRecord>(&sql)
            .bind(user_id)
            .bind(phrase_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn set_converted(
        &self,
        user_id: i64,
        phrase_id: i64,
        input_uri: &str,
        stored_uri: &str,
    ) -> RecordStoreResult<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(ConversionStatus, String)> = sqlx::query_as(
            r#"
            SELECT status, original_uri FROM audio_records
            WHERE user_id = $1 AND phrase_id = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(phrase_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match current {
            None => {
                tx.rollback().await.ok();
                return Err(RecordStoreError::NotFound { user_id, phrase_id });
            }
            Some((_, original_uri)) if original_uri != input_uri => FinalizeOutcome::Superseded,
            Some((ConversionStatus::Completed, _)) => FinalizeOutcome::AlreadyCompleted,
            Some((ConversionStatus::Deleted, _)) => FinalizeOutcome::Deleted,
            Some((ConversionStatus::Ongoing, _)) => {
                sqlx::query(
                    r#"
                    UPDATE audio_records
                    SET stored_uri = $3,
                        status = 'completed',
                        updated_at = NOW()
                    WHERE user_id = $1 AND phrase_id = $2
                    "#,
                )
                .bind(user_id)
                .bind(phrase_id)
                .bind(stored_uri)
                .execute(&mut *tx)
                .await?;
                FinalizeOutcome::Applied
            }
        };

        tx.commit().await?;

        tracing::debug!(user_id, phrase_id, outcome = ?outcome, "Audio record finalized");

        Ok(outcome)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Record store connections closed");
    }
}
