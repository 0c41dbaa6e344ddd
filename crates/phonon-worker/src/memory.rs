//! In-process queue.
//!
//! Messages live in per-topic FIFOs and reach only consumers in the same
//! process. Used by tests and single-process development runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::queue::{
    Consumer, Disposition, Message, MessageHandler, MessageOptions, Producer, QueueError,
    RedeliveryPolicy,
};

#[derive(Default)]
struct Topic {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl Topic {
    async fn push(&self, message: Message) {
        self.messages.lock().await.push_back(message);
        self.notify.notify_one();
    }
}

#[derive(Clone, Default)]
pub struct MemoryQueue {
    topics: Arc<Mutex<HashMap<String, Arc<Topic>>>>,
    policy: RedeliveryPolicy,
    closed: Arc<AtomicBool>,
}

impl MemoryQueue {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Number of deliverable messages waiting on a topic
    pub async fn pending(&self, topic: &str) -> usize {
        self.topic(topic).await.messages.lock().await.len()
    }

    /// Handle every message currently waiting on `topic`, then return how
    /// many were handled. Redeliveries scheduled meanwhile are not awaited.
    pub async fn drain(&self, topic: &str, handler: &dyn MessageHandler) -> usize {
        let state = self.topic(topic).await;
        let mut handled = 0;
        loop {
            let next = state.messages.lock().await.pop_front();
            match next {
                Some(message) => {
                    self.dispatch(topic, &state, message, handler).await;
                    handled += 1;
                }
                None => return handled,
            }
        }
    }

    async fn dispatch(
        &self,
        topic: &str,
        state: &Arc<Topic>,
        message: Message,
        handler: &dyn MessageHandler,
    ) {
        let result = handler.handle(&message).await;
        match self.policy.decide(message.delivery_count, &result) {
            Disposition::Ack => {
                tracing::debug!(topic = %topic, message_id = ?message.id, "Message handled");
            }
            Disposition::Redeliver { after } => {
                if let Err(e) = &result {
                    tracing::warn!(
                        topic = %topic,
                        message_id = ?message.id,
                        delivery_count = message.delivery_count,
                        backoff_seconds = after.as_secs(),
                        error = %e,
                        "Message handling failed, scheduling redelivery"
                    );
                }
                let state = state.clone();
                let mut retry = message;
                retry.delivery_count += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    state.push(retry).await;
                });
            }
            Disposition::Drop => {
                if let Err(e) = &result {
                    tracing::error!(
                        topic = %topic,
                        message_id = ?message.id,
                        delivery_count = message.delivery_count,
                        transient = e.is_transient(),
                        error = %e,
                        "Message handling failed, dropping message"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Producer for MemoryQueue {
    async fn publish(
        &self,
        topic: &str,
        value: Vec<u8>,
        options: MessageOptions,
    ) -> Result<String, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let id = Uuid::new_v4().to_string();
        let message = Message {
            value,
            id: Some(id.clone()),
            content_type: options.content_type,
            correlation_id: options.correlation_id,
            delivery_count: 1,
        };

        let state = self.topic(topic).await;
        match options.delay {
            Some(delay) if !delay.is_zero() => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.push(message).await;
                });
            }
            _ => state.push(message).await,
        }

        tracing::debug!(topic = %topic, message_id = %id, "Message published");
        Ok(id)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::info!("In-memory queue closed");
    }
}

#[async_trait]
impl Consumer for MemoryQueue {
    async fn consume(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let state = self.topic(topic).await;
        tracing::info!(topic = %topic, "In-memory consumer started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = state.messages.lock().await.pop_front();
            match next {
                Some(message) => {
                    self.dispatch(topic, &state, message, handler.as_ref())
                        .await
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = state.notify.notified() => {}
                    }
                }
            }
        }

        tracing::info!(topic = %topic, "In-memory consumer stopped");
        Ok(())
    }
}
