//! Application setup and initialization

pub mod consumers;
pub mod database;
pub mod routes;
pub mod server;
pub mod storage;

use crate::state::AppState;
use anyhow::{Context, Result};
use axum::Router;
use phonon_core::{Config, QueueBackend};
use phonon_db::{AudioRecordStore, PgAudioRecordRepository};
use phonon_processing::FormatConverter;
use phonon_services::{AudioService, AudioServiceConfig};
use phonon_storage::Storage;
use phonon_worker::{create_queue, ConsumerHandle, QueueHandles};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Adapters the application is built from
pub struct Backends {
    pub store: Arc<dyn AudioRecordStore>,
    pub storage: Arc<dyn Storage>,
    pub queue: QueueHandles,
    /// Needed only when consumers run in-process (in-memory queue)
    pub converter: Option<Arc<dyn FormatConverter>>,
}

/// A wired application: router plus any in-process consumers
pub struct Application {
    pub state: Arc<AppState>,
    pub router: Router,
    consumers: Vec<ConsumerHandle>,
    cancel: CancellationToken,
}

/// Build state, router and (for the in-memory queue) the embedded conversion
/// and cleanup consumers.
pub fn assemble(config: Config, backends: Backends) -> Application {
    let audio = AudioService::new(
        backends.store.clone(),
        backends.storage.clone(),
        backends.queue.producer.clone(),
        AudioServiceConfig::from_config(&config),
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    if config.queue_backend == QueueBackend::Memory {
        if let Some(converter) = backends.converter {
            handles.push(ConsumerHandle::spawn(
                backends.queue.consumer.clone(),
                config.conversion_topic.clone(),
                consumers::conversion_handler(converter, backends.store.clone()),
                cancel.child_token(),
            ));
        } else {
            tracing::warn!("No converter configured; uploads will not be converted");
        }
        handles.push(ConsumerHandle::spawn(
            backends.queue.consumer.clone(),
            config.cleanup_topic.clone(),
            consumers::cleanup_handler(backends.storage.clone()),
            cancel.child_token(),
        ));
        tracing::info!(
            consumers = handles.len(),
            "Running queue consumers in-process"
        );
    }

    let state = AppState::new(config.clone(), audio);
    let router = routes::setup_routes(&config, state.clone());

    Application {
        state,
        router,
        consumers: handles,
        cancel,
    }
}

/// Initialize the entire application from configuration
pub async fn initialize_app(config: Config) -> Result<Application> {
    config.validate().context("Configuration validation failed")?;

    phonon_infra::init_telemetry("phonon-api", config.log_format)
        .context("Failed to initialize telemetry")?;

    tracing::info!(
        environment = %config.environment,
        "Configuration loaded and validated successfully"
    );

    let pool = database::setup_database(&config).await?;
    let storage = storage::setup_storage(&config).await?;
    let queue = create_queue(&config, Some(pool.clone()))?;
    let store: Arc<dyn AudioRecordStore> = Arc::new(PgAudioRecordRepository::new(pool));

    let converter = if config.queue_backend == QueueBackend::Memory {
        Some(storage::setup_converter(&config, storage.clone()).await)
    } else {
        None
    };

    Ok(assemble(
        config,
        Backends {
            store,
            storage,
            queue,
            converter,
        },
    ))
}

impl Application {
    /// Serve until a shutdown signal, then shut down in order
    pub async fn run(self) -> Result<()> {
        let served = server::start_server(&self.state.config, self.router.clone()).await;
        self.shutdown().await;
        served
    }

    /// Stop consumers (letting in-flight messages finish), close the queue,
    /// then close the record store.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let timeout = self.state.config.shutdown_timeout();
        for consumer in self.consumers {
            let topic = consumer.topic().to_string();
            if let Err(e) = consumer.shutdown(timeout).await {
                tracing::error!(error = %e, topic = %topic, "Consumer exited with error");
            }
        }

        self.state.audio.shutdown().await;
        tracing::info!("Shutdown complete");
    }
}
