use anyhow::{anyhow, Result};
use phonon_core::{Config, QueueBackend};
use sqlx::PgPool;
use std::sync::Arc;

use crate::memory::MemoryQueue;
use crate::postgres::{PgQueue, PgQueueConfig};
use crate::queue::{Consumer, Producer, RedeliveryPolicy};

/// Producer and consumer sides of one queue backend
#[derive(Clone)]
pub struct QueueHandles {
    pub producer: Arc<dyn Producer>,
    pub consumer: Arc<dyn Consumer>,
}

/// Create the configured queue backend. `pool` is required for the
/// PostgreSQL backend.
pub fn create_queue(config: &Config, pool: Option<PgPool>) -> Result<QueueHandles> {
    let policy = RedeliveryPolicy::new(config.queue_max_redeliveries);

    match config.queue_backend {
        QueueBackend::Postgres => {
            let pool = pool.ok_or_else(|| anyhow!("PostgreSQL queue requires a database pool"))?;
            let queue = Arc::new(PgQueue::new(
                pool,
                PgQueueConfig {
                    poll_interval: config.queue_poll_interval(),
                    visibility_timeout_secs: config.queue_visibility_timeout_secs,
                    policy,
                    retention: config.queue_retention(),
                    ..PgQueueConfig::default()
                },
            ));
            tracing::info!(
                max_redeliveries = policy.max_redeliveries,
                retention_secs = config.queue_retention_secs,
                "Using PostgreSQL queue"
            );
            Ok(QueueHandles {
                producer: queue.clone(),
                consumer: queue,
            })
        }
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory queue; messages only reach consumers in this process");
            let queue = Arc::new(MemoryQueue::new(policy));
            Ok(QueueHandles {
                producer: queue.clone(),
                consumer: queue,
            })
        }
    }
}
