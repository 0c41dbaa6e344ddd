//! ffmpeg-backed converter

use crate::converter::{ConversionError, ConversionResult, FormatConverter};
use async_trait::async_trait;
use phonon_core::models::{extract_extension, AudioFormat};
use phonon_storage::{keys, Storage, StorageError};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

pub struct FfmpegConverter {
    ffmpeg_path: String,
    target: AudioFormat,
    storage: Arc<dyn Storage>,
}

impl FfmpegConverter {
    pub fn new(ffmpeg_path: String, target: AudioFormat, storage: Arc<dyn Storage>) -> Self {
        Self {
            ffmpeg_path,
            target,
            storage,
        }
    }

    /// Run `ffmpeg -version` to fail fast when the binary is missing
    pub async fn check_available(&self) -> ConversionResult<()> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !output.success() {
            return Err(ConversionError::Ffmpeg(format!(
                "{} -version exited with {}",
                self.ffmpeg_path, output
            )));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, input_path, output_path))]
    async fn transcode(&self, input_path: &Path, output_path: &Path) -> ConversionResult<()> {
        let output = Command::new(&self.ffmpeg_path)
            .args(transcode_args(input_path, output_path, self.target))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::Ffmpeg(stderr.trim().to_string()));
        }

        Ok(())
    }
}

/// Codec and muxer ffmpeg uses for each storage format
fn codec_for(format: AudioFormat) -> (&'static str, &'static str) {
    match format {
        AudioFormat::Wav => ("pcm_s16le", "wav"),
        AudioFormat::M4a => ("aac", "ipod"),
    }
}

fn transcode_args(input_path: &Path, output_path: &Path, format: AudioFormat) -> Vec<String> {
    let (codec, muxer) = codec_for(format);
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input_path.to_string_lossy().to_string(),
        "-acodec".to_string(),
        codec.to_string(),
        "-f".to_string(),
        muxer.to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl FormatConverter for FfmpegConverter {
    #[tracing::instrument(skip(self), fields(target = %self.target))]
    async fn convert(&self, input_uri: &str) -> ConversionResult<String> {
        let start = std::time::Instant::now();

        let data = self.storage.download(input_uri).await.map_err(|e| match e {
            StorageError::NotFound(key) => ConversionError::InputNotFound(key),
            other => ConversionError::Storage(other),
        })?;

        // Keep the input extension so ffmpeg can pick the demuxer
        let input_suffix = extract_extension(input_uri)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let input_temp = tempfile::Builder::new()
            .prefix("phonon-in-")
            .suffix(&input_suffix)
            .tempfile()?;
        tokio::fs::write(input_temp.path(), &data).await?;

        let output_temp = tempfile::Builder::new()
            .prefix("phonon-out-")
            .suffix(&format!(".{}", self.target.extension()))
            .tempfile()?;

        self.transcode(input_temp.path(), output_temp.path()).await?;

        let converted = tokio::fs::read(output_temp.path()).await?;
        let output_key = keys::converted_key(input_uri, self.target);
        let converted_size = converted.len();

        self.storage
            .upload_with_key(&output_key, converted, self.target.content_type())
            .await?;

        tracing::info!(
            input_uri = %input_uri,
            output_uri = %output_key,
            input_bytes = data.len(),
            output_bytes = converted_size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Audio converted"
        );

        Ok(output_key)
    }

    fn target_format(&self) -> AudioFormat {
        self.target
    }
}
