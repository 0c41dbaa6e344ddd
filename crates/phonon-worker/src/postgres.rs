//! PostgreSQL-backed queue
//!
//! Messages are rows in `queue_messages`. Producers insert and `pg_notify`;
//! consumers LISTEN for wake-ups and also poll, so a lost notification only
//! delays delivery by one poll interval. A message claimed by a consumer that
//! died is returned to `pending` once its visibility timeout expires.
//! Finished messages are deleted once they are older than the retention age.

use async_trait::async_trait;
use chrono::Utc;
use phonon_db::{NewQueueMessage, QueueMessage, QueueMessageRepository, QUEUE_NOTIFY_CHANNEL};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::queue::{
    Consumer, DeliveryMode, Disposition, Message, MessageHandler, MessageOptions, Producer,
    QueueError, RedeliveryPolicy,
};

#[derive(Debug, Clone)]
pub struct PgQueueConfig {
    pub poll_interval: Duration,
    pub visibility_timeout_secs: u64,
    pub policy: RedeliveryPolicy,
    /// Age after which `done` and `failed` rows are deleted. `None` keeps them.
    pub retention: Option<Duration>,
    pub retention_sweep_interval: Duration,
}

impl Default for PgQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            visibility_timeout_secs: 600,
            policy: RedeliveryPolicy::default(),
            retention: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            retention_sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone)]
pub struct PgQueue {
    repository: QueueMessageRepository,
    config: PgQueueConfig,
    closed: Arc<AtomicBool>,
}

impl PgQueue {
    pub fn new(pool: PgPool, config: PgQueueConfig) -> Self {
        Self {
            repository: QueueMessageRepository::new(pool),
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Forward NOTIFYs for `topic` into `tx`, reconnecting on failure
    fn spawn_listener(&self, topic: String, tx: mpsc::Sender<()>) -> tokio::task::JoinHandle<()> {
        let pool = self.repository.pool().clone();
        tokio::spawn(async move {
            loop {
                match sqlx::postgres::PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(QUEUE_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        while let Ok(notification) = listener.recv().await {
                            if notification.payload() == topic {
                                let _ = tx.try_send(());
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        })
    }

    /// Claim and handle messages until the topic is empty or `cancel` fires
    async fn drain_available(
        &self,
        topic: &str,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = self
            .repository
            .requeue_stale(self.config.visibility_timeout_secs as i64)
            .await
        {
            tracing::error!(error = %e, topic = %topic, "Failed to requeue stale messages");
        }

        while !cancel.is_cancelled() {
            let row = match self.repository.claim_next(topic).await {
                Ok(Some(row)) => row,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!(error = %e, topic = %topic, "Failed to claim message");
                    return;
                }
            };
            self.dispatch(topic, row, handler).await;
        }
    }

    /// Delete finished messages past the retention age
    async fn sweep_finished(&self, retention: Duration) {
        if let Err(e) = self
            .repository
            .delete_finished_older_than(retention.as_secs() as i64)
            .await
        {
            tracing::error!(error = %e, "Failed to delete finished queue messages");
        }
    }

    async fn dispatch(&self, topic: &str, row: QueueMessage, handler: &dyn MessageHandler) {
        let id = row.id;
        let message = to_message(row);
        let result = handler.handle(&message).await;

        let outcome = match self.config.policy.decide(message.delivery_count, &result) {
            Disposition::Ack => self.repository.mark_done(id).await,
            Disposition::Redeliver { after } => {
                let error = result.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
                tracing::warn!(
                    topic = %topic,
                    message_id = %id,
                    delivery_count = message.delivery_count,
                    backoff_seconds = after.as_secs(),
                    error = %error,
                    "Message handling failed, scheduling redelivery"
                );
                self.repository
                    .reschedule(id, &error, after.as_secs() as i64)
                    .await
            }
            Disposition::Drop => {
                let error = result.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
                tracing::error!(
                    topic = %topic,
                    message_id = %id,
                    delivery_count = message.delivery_count,
                    error = %error,
                    "Message handling failed, dropping message"
                );
                self.repository.mark_failed(id, &error).await
            }
        };

        if let Err(e) = outcome {
            tracing::error!(error = %e, message_id = %id, "Failed to record message outcome");
        }
    }
}

fn to_message(row: QueueMessage) -> Message {
    Message {
        value: row.payload,
        id: Some(row.id.to_string()),
        content_type: row.content_type,
        correlation_id: row.correlation_id,
        delivery_count: row.delivery_count.max(1) as u32,
    }
}

fn to_row(topic: &str, value: Vec<u8>, options: MessageOptions) -> NewQueueMessage {
    let delay = options
        .delay
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(chrono::Duration::zero);

    NewQueueMessage {
        topic: topic.to_string(),
        payload: value,
        content_type: options.content_type,
        content_encoding: options.content_encoding,
        correlation_id: options.correlation_id,
        reply_to: options.reply_to,
        priority: i16::from(options.priority),
        persistent: options.delivery_mode == DeliveryMode::Persistent,
        available_at: Utc::now() + delay,
    }
}

#[async_trait]
impl Producer for PgQueue {
    async fn publish(
        &self,
        topic: &str,
        value: Vec<u8>,
        options: MessageOptions,
    ) -> Result<String, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let id = self
            .repository
            .enqueue(to_row(topic, value, options))
            .await?;
        Ok(id.to_string())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("PostgreSQL queue closed");
    }
}

#[async_trait]
impl Consumer for PgQueue {
    async fn consume(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        tracing::info!(
            topic = %topic,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_redeliveries = self.config.policy.max_redeliveries,
            "Queue consumer started"
        );

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        let listener = self.spawn_listener(topic.to_string(), notify_tx);

        // Pick up anything published while no consumer was running
        self.drain_available(topic, handler.as_ref(), &cancel).await;

        let mut sweep = tokio::time::interval(self.config.retention_sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sweep.tick(), if self.config.retention.is_some() => {
                    if let Some(retention) = self.config.retention {
                        self.sweep_finished(retention).await;
                    }
                }
                _ = notify_rx.recv() => {
                    self.drain_available(topic, handler.as_ref(), &cancel).await;
                }
                _ = sleep(self.config.poll_interval) => {
                    self.drain_available(topic, handler.as_ref(), &cancel).await;
                }
            }
        }

        listener.abort();
        tracing::info!(topic = %topic, "Queue consumer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_row_applies_delay_and_mode() {
        let before = Utc::now();
        let options = MessageOptions::default()
            .with_delay(Duration::from_secs(300))
            .with_delivery_mode(DeliveryMode::NonPersistent)
            .with_correlation_id("abc");

        let row = to_row("janitor", b"{}".to_vec(), options);

        assert_eq!(row.topic, "janitor");
        assert!(!row.persistent);
        assert_eq!(row.correlation_id.as_deref(), Some("abc"));
        assert!(row.available_at >= before + chrono::Duration::seconds(300));
    }

    #[test]
    fn test_default_config_sweeps_week_old_messages() {
        let config = PgQueueConfig::default();
        assert_eq!(config.retention, Some(Duration::from_secs(604_800)));
        assert!(config.retention_sweep_interval < config.retention.unwrap());
        assert_eq!(config.policy.max_redeliveries, 0);
    }

    #[test]
    fn test_to_row_defaults_to_immediate_persistent() {
        let before = Utc::now();
        let row = to_row("audio_conversion", vec![1, 2], MessageOptions::default());
        assert!(row.persistent);
        assert_eq!(row.priority, 0);
        assert!(row.available_at < before + chrono::Duration::seconds(5));
        assert_eq!(row.content_type, "application/json");
    }
}
