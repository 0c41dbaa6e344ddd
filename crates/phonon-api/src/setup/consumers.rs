//! Queue consumer wiring for the API (in-memory queue) and the standalone
//! worker binaries

use anyhow::{bail, Result};
use phonon_core::{Config, QueueBackend};
use phonon_db::{AudioRecordStore, PgAudioRecordRepository};
use phonon_processing::FormatConverter;
use phonon_storage::Storage;
use phonon_worker::{
    create_queue, CleanupHandler, ConsumerHandle, ConversionHandler, MessageHandler,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::database::setup_database;
use super::server::shutdown_signal;
use super::storage::{setup_converter, setup_storage};

/// Which background handler a worker process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerRole {
    Conversion,
    Janitor,
}

impl ConsumerRole {
    pub fn service_name(&self) -> &'static str {
        match self {
            ConsumerRole::Conversion => "phonon-conversion-worker",
            ConsumerRole::Janitor => "phonon-janitor",
        }
    }

    pub fn topic<'a>(&self, config: &'a Config) -> &'a str {
        match self {
            ConsumerRole::Conversion => &config.conversion_topic,
            ConsumerRole::Janitor => &config.cleanup_topic,
        }
    }
}

pub fn conversion_handler(
    converter: Arc<dyn FormatConverter>,
    store: Arc<dyn AudioRecordStore>,
) -> Arc<dyn MessageHandler> {
    Arc::new(ConversionHandler::new(converter, store))
}

pub fn cleanup_handler(storage: Arc<dyn Storage>) -> Arc<dyn MessageHandler> {
    Arc::new(CleanupHandler::new(storage))
}

/// Run one consumer until Ctrl+C or SIGTERM, then stop it and close the
/// queue before the record store.
pub async fn run_consumer(config: Config, role: ConsumerRole) -> Result<()> {
    if config.queue_backend == QueueBackend::Memory {
        bail!(
            "{} needs a shared queue; set QUEUE_BACKEND=postgres (the API runs in-memory consumers itself)",
            role.service_name()
        );
    }

    let pool = setup_database(&config).await?;
    let storage = setup_storage(&config).await?;
    let queue = create_queue(&config, Some(pool.clone()))?;
    let store: Arc<dyn AudioRecordStore> = Arc::new(PgAudioRecordRepository::new(pool));

    let handler = match role {
        ConsumerRole::Conversion => {
            let converter = setup_converter(&config, storage).await;
            conversion_handler(converter, store.clone())
        }
        ConsumerRole::Janitor => cleanup_handler(storage),
    };

    let cancel = CancellationToken::new();
    let consumer = ConsumerHandle::spawn(
        queue.consumer.clone(),
        role.topic(&config),
        handler,
        cancel.clone(),
    );
    tracing::info!(role = ?role, topic = %consumer.topic(), "Worker started");

    shutdown_signal().await;

    if let Err(e) = consumer.shutdown(config.shutdown_timeout()).await {
        tracing::error!(error = %e, "Consumer exited with error");
    }
    queue.producer.close().await;
    store.close().await;

    tracing::info!(role = ?role, "Worker stopped");
    Ok(())
}
