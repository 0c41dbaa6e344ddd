//! Long-lived consumer tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{Consumer, MessageHandler, QueueError};

/// A consumer loop running on its own task
pub struct ConsumerHandle {
    topic: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), QueueError>>,
}

impl ConsumerHandle {
    /// Start consuming `topic`. The loop stops when `cancel` (or a parent
    /// token) fires.
    pub fn spawn(
        consumer: Arc<dyn Consumer>,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let topic = topic.into();
        let task = {
            let topic = topic.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.consume(&topic, handler, cancel).await })
        };

        Self {
            topic,
            cancel,
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the loop to exit on its own (after cancellation elsewhere)
    pub async fn join(self) -> Result<(), QueueError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(QueueError::Backend(anyhow::anyhow!(
                "consumer task for {} panicked: {}",
                self.topic,
                e
            ))),
        }
    }

    /// Cancel the loop and wait up to `timeout` for the in-flight message to
    /// finish. The task is aborted if it does not stop in time.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), QueueError> {
        self.cancel.cancel();
        let topic = self.topic;
        let mut task = self.task;

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => {
                tracing::info!(topic = %topic, "Consumer stopped");
                result
            }
            Ok(Err(e)) => Err(QueueError::Backend(anyhow::anyhow!(
                "consumer task for {} panicked: {}",
                topic,
                e
            ))),
            Err(_) => {
                tracing::warn!(
                    topic = %topic,
                    timeout_secs = timeout.as_secs(),
                    "Consumer did not stop in time, aborting"
                );
                task.abort();
                Ok(())
            }
        }
    }
}
