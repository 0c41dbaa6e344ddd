//! Storage and converter setup

use anyhow::{Context, Result};
use phonon_core::Config;
use phonon_processing::{FfmpegConverter, FormatConverter};
use phonon_storage::{create_storage, Storage};
use std::sync::Arc;

pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!("Initializing storage...");
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage")?;
    tracing::info!(backend = %storage.backend_type(), "Storage initialized");
    Ok(storage)
}

/// Build the ffmpeg converter. A missing binary is logged, not fatal: the
/// process still starts and conversions fail per message.
pub async fn setup_converter(
    config: &Config,
    storage: Arc<dyn Storage>,
) -> Arc<dyn FormatConverter> {
    let converter = FfmpegConverter::new(
        config.ffmpeg_path.clone(),
        config.converter_target_format,
        storage,
    );

    match converter.check_available().await {
        Ok(()) => tracing::info!(
            ffmpeg_path = %config.ffmpeg_path,
            target_format = %config.converter_target_format,
            "FFmpeg available"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            ffmpeg_path = %config.ffmpeg_path,
            "FFmpeg check failed; conversions will fail until it is installed"
        ),
    }

    Arc::new(converter)
}
