//! Queue contract: at-least-once delivery of byte payloads between producers
//! and consumers.
//!
//! Consumers process one message at a time and observe a shared
//! [`CancellationToken`]. Cancellation is checked between messages, so a
//! message that is being handled always runs to completion.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use phonon_core::models::JobPayload;
use phonon_core::{AppError, JobError};

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Maximum delay in seconds before redelivering a failed message. Caps
/// exponential backoff so high delivery counts do not produce long delays.
pub const MAX_REDELIVERY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for the n-th redelivery (exponential with cap).
#[inline]
pub(crate) fn compute_redelivery_backoff_seconds(redelivery: u32) -> u64 {
    2_u64
        .checked_pow(redelivery)
        .unwrap_or(u64::MAX)
        .min(MAX_REDELIVERY_BACKOFF_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// May be lost if the broker restarts
    NonPersistent = 1,
    /// Survives broker restarts
    #[default]
    Persistent = 2,
}

/// Delivery metadata attached to a published message
#[derive(Debug, Clone)]
pub struct MessageOptions {
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    /// Hold the message back for this long before it becomes deliverable
    pub delay: Option<Duration>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_encoding: None,
            correlation_id: None,
            reply_to: None,
            delivery_mode: DeliveryMode::Persistent,
            priority: 0,
            delay: None,
        }
    }
}

impl MessageOptions {
    pub fn persistent() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }
}

/// A delivered message
#[derive(Debug, Clone)]
pub struct Message {
    pub value: Vec<u8>,
    pub id: Option<String>,
    pub content_type: String,
    pub correlation_id: Option<String>,
    /// 1 on first delivery
    pub delivery_count: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Topic {0} already has an active consumer")]
    ConsumerBusy(String),

    #[error("Queue backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::QueueUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// Publish a message and return its id
    async fn publish(
        &self,
        topic: &str,
        value: Vec<u8>,
        options: MessageOptions,
    ) -> Result<String, QueueError>;

    /// Stop accepting messages. Later publishes fail with `QueueError::Closed`.
    async fn close(&self);
}

/// Processes messages from one topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), JobError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Deliver messages from `topic` to `handler` one at a time until
    /// `cancel` fires.
    async fn consume(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError>;
}

/// Encode a payload as JSON and publish it
pub async fn publish_json<P: JobPayload + Sync>(
    producer: &dyn Producer,
    topic: &str,
    payload: &P,
    options: MessageOptions,
) -> Result<String, QueueError> {
    let value = payload.encode()?;
    producer.publish(topic, value, options).await
}

/// What a queue does with a message after its handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Redeliver { after: Duration },
    Drop,
}

/// Redelivery policy for failed messages.
///
/// Permanent failures are always dropped. Transient failures are redelivered
/// with exponential backoff until `max_redeliveries` is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedeliveryPolicy {
    pub max_redeliveries: u32,
}

impl RedeliveryPolicy {
    pub fn new(max_redeliveries: u32) -> Self {
        Self { max_redeliveries }
    }

    pub fn decide(&self, delivery_count: u32, result: &Result<(), JobError>) -> Disposition {
        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_transient() && delivery_count <= self.max_redeliveries => {
                let backoff = compute_redelivery_backoff_seconds(delivery_count.saturating_sub(1));
                Disposition::Redeliver {
                    after: Duration::from_secs(backoff),
                }
            }
            Err(_) => Disposition::Drop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_backoff_exponential_then_capped() {
        assert_eq!(compute_redelivery_backoff_seconds(0), 1);
        assert_eq!(compute_redelivery_backoff_seconds(1), 2);
        assert_eq!(compute_redelivery_backoff_seconds(2), 4);
        assert_eq!(compute_redelivery_backoff_seconds(8), 256);
        assert_eq!(compute_redelivery_backoff_seconds(9), MAX_REDELIVERY_BACKOFF_SECS);
        assert_eq!(compute_redelivery_backoff_seconds(100), MAX_REDELIVERY_BACKOFF_SECS);
    }

    #[test]
    fn default_policy_never_redelivers() {
        let policy = RedeliveryPolicy::default();
        let result = Err(JobError::transient(anyhow::anyhow!("db down")));
        assert_eq!(policy.decide(1, &result), Disposition::Drop);
        assert_eq!(policy.decide(1, &Ok(())), Disposition::Ack);
    }

    #[test]
    fn transient_failures_redelivered_until_budget_spent() {
        let policy = RedeliveryPolicy::new(2);
        let result = Err(JobError::transient(anyhow::anyhow!("timeout")));
        assert_eq!(
            policy.decide(1, &result),
            Disposition::Redeliver {
                after: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2, &result),
            Disposition::Redeliver {
                after: Duration::from_secs(2)
            }
        );
        assert_eq!(policy.decide(3, &result), Disposition::Drop);
    }

    #[test]
    fn permanent_failures_never_redelivered() {
        let policy = RedeliveryPolicy::new(5);
        let result = Err(JobError::permanent(anyhow::anyhow!("malformed")));
        assert_eq!(policy.decide(1, &result), Disposition::Drop);
    }

    #[test]
    fn default_options_are_persistent_json() {
        let options = MessageOptions::default();
        assert_eq!(options.content_type, "application/json");
        assert_eq!(options.delivery_mode, DeliveryMode::Persistent);
        assert!(options.delay.is_none());
    }
}
