use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Channel used to wake consumers when a message is enqueued
pub const QUEUE_NOTIFY_CHANNEL: &str = "phonon_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "queue_message_status", rename_all = "lowercase")]
pub enum QueueMessageStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub priority: i16,
    pub persistent: bool,
    pub status: QueueMessageStatus,
    pub delivery_count: i32,
    pub last_error: Option<String>,
    pub available_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQueueMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub priority: i16,
    pub persistent: bool,
    pub available_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str = r#"
    id,
    topic,
    payload,
    content_type,
    content_encoding,
    correlation_id,
    reply_to,
    priority,
    persistent,
    status,
    delivery_count,
    last_error,
    available_at,
    claimed_at,
    created_at,
    updated_at
"#;

#[derive(Clone)]
pub struct QueueMessageRepository {
    pool: PgPool,
}

impl QueueMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a message, then wake listening consumers.
    ///
    /// The notify runs after the insert has committed. A failed notify leaves
    /// the message persisted and consumers pick it up on their next poll.
    #[tracing::instrument(skip(self, message), fields(topic = %message.topic))]
    pub async fn enqueue(&self, message: NewQueueMessage) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO queue_messages (
                topic, payload, content_type, content_encoding, correlation_id,
                reply_to, priority, persistent, available_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&message.topic)
        .bind(&message.payload)
        .bind(&message.content_type)
        .bind(&message.content_encoding)
        .bind(&message.correlation_id)
        .bind(&message.reply_to)
        .bind(message.priority)
        .bind(message.persistent)
        .bind(message.available_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert queue message")?;

        tracing::debug!(message_id = %id, topic = %message.topic, "Message enqueued");

        if let Err(e) = self.notify(&message.topic).await {
            tracing::warn!(
                error = %e,
                message_id = %id,
                "Failed to notify consumers, message will be picked up by polling"
            );
        }

        Ok(id)
    }

    /// Send a wake-up for `topic` on the queue channel
    pub async fn notify(&self, topic: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(QUEUE_NOTIFY_CHANNEL)
            .bind(topic)
            .execute(&self.pool)
            .await
            .context("Failed to send pg_notify")?;
        Ok(())
    }

    /// Claim the next deliverable message on a topic.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent consumers never claim the
    /// same message.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(&self, topic: &str) -> Result<Option<QueueMessage>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM queue_messages
            WHERE topic = $1
                AND status = 'pending'
                AND available_at <= NOW()
            ORDER BY priority DESC, available_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(topic)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next queue message")?;

        let Some(id) = id else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let sql = format!(
            r#"
            UPDATE queue_messages
            SET status = 'processing',
                claimed_at = NOW(),
                delivery_count = delivery_count + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        );

        let message = sqlx::query_as::<Postgres, QueueMessage>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to claim queue message")?;

        tx.commit().await.context("Failed to commit transaction")?;

        tracing::debug!(
            message_id = %message.id,
            topic = %message.topic,
            delivery_count = message.delivery_count,
            "Message claimed"
        );

        Ok(Some(message))
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_done(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'done', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark queue message done")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'failed', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark queue message failed")?;

        Ok(())
    }

    /// Return a claimed message to `pending`, deliverable after `delay_seconds`
    #[tracing::instrument(skip(self, error))]
    pub async fn reschedule(&self, id: Uuid, error: &str, delay_seconds: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'pending',
                last_error = $2,
                available_at = NOW() + make_interval(secs => $3),
                claimed_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(delay_seconds as f64)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule queue message")?;

        Ok(())
    }

    /// Return messages stuck in `processing` longer than `timeout_seconds` to
    /// `pending`. Covers consumers that died mid-message.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_stale(&self, timeout_seconds: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'pending',
                claimed_at = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
                AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(timeout_seconds as f64)
        .execute(&self.pool)
        .await
        .context("Failed to requeue stale queue messages")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Requeued stale queue messages");
        }

        Ok(count)
    }

    /// Delete `done` and `failed` messages last touched more than
    /// `older_than_secs` ago. Returns the number of rows removed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_finished_older_than(&self, older_than_secs: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            WITH deleted AS (
                DELETE FROM queue_messages
                WHERE status IN ('done', 'failed')
                    AND updated_at < NOW() - make_interval(secs => $1)
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(older_than_secs as f64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to delete finished queue messages")?;

        if count > 0 {
            tracing::info!(count, older_than_secs, "Deleted finished queue messages");
        }

        Ok(count as u64)
    }
}
