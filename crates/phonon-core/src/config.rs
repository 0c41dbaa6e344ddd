//! Configuration module
//!
//! Every binary (API server, conversion worker, janitor) loads the same
//! [`Config`] from environment variables, optionally seeded from a `.env` file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::AudioFormat;
use crate::storage_types::{QueueBackend, StorageBackend};

const DEFAULT_PORT: u16 = 8080;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_UPLOAD_SIZE_MB: usize = 10;
const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const QUEUE_MAX_REDELIVERIES: u32 = 0;
const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 600;
const QUEUE_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
const SERVED_FILE_TTL_SECS: u64 = 300;
const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_format: LogFormat,
    // Blob store
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub local_storage_base_url: String,
    pub max_upload_size_bytes: usize,
    // Converter
    pub ffmpeg_path: String,
    pub converter_target_format: AudioFormat,
    // Queue
    pub queue_backend: QueueBackend,
    pub conversion_topic: String,
    pub cleanup_topic: String,
    pub queue_poll_interval_ms: u64,
    /// Redeliveries allowed after a transient handler failure. 0 = never redeliver.
    pub queue_max_redeliveries: u32,
    pub queue_visibility_timeout_secs: u64,
    /// Age after which finished queue messages are deleted. 0 = keep forever.
    pub queue_retention_secs: u64,
    pub served_file_ttl_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// Output format of the tracing subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_source<F>(get: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = get("ENVIRONMENT")
            .or_else(|| get("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let max_upload_size_mb = get("MAX_UPLOAD_SIZE_MB")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let config = Config {
            environment,
            server_port: get("PORT")
                .unwrap_or_else(|| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            database_url,
            db_max_connections: get("DB_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: get("DB_TIMEOUT_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            log_format: get("LOG_FORMAT")
                .map(|s| s.parse::<LogFormat>())
                .transpose()?
                .unwrap_or(LogFormat::Text),
            storage_backend: get("STORAGE_BACKEND")
                .map(|s| s.parse::<StorageBackend>())
                .transpose()?
                .unwrap_or(StorageBackend::Local),
            local_storage_path: get("LOCAL_STORAGE_PATH").unwrap_or_else(|| "./data".to_string()),
            local_storage_base_url: get("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{}/files", DEFAULT_PORT)),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            converter_target_format: get("CONVERTER_TARGET_FORMAT")
                .map(|s| s.parse::<AudioFormat>())
                .transpose()
                .map_err(|e| anyhow::anyhow!("CONVERTER_TARGET_FORMAT: {}", e))?
                .unwrap_or(AudioFormat::Wav),
            queue_backend: get("QUEUE_BACKEND")
                .map(|s| s.parse::<QueueBackend>())
                .transpose()?
                .unwrap_or(QueueBackend::Postgres),
            conversion_topic: get("QUEUE_CONVERSION_TOPIC")
                .unwrap_or_else(|| "audio_conversion".to_string()),
            cleanup_topic: get("QUEUE_CLEANUP_TOPIC").unwrap_or_else(|| "janitor".to_string()),
            queue_poll_interval_ms: get("QUEUE_POLL_INTERVAL_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUEUE_POLL_INTERVAL_MS),
            queue_max_redeliveries: get("QUEUE_MAX_REDELIVERIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUEUE_MAX_REDELIVERIES),
            queue_visibility_timeout_secs: get("QUEUE_VISIBILITY_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUEUE_VISIBILITY_TIMEOUT_SECS),
            queue_retention_secs: get("QUEUE_RETENTION_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUEUE_RETENTION_SECS),
            served_file_ttl_secs: get("SERVED_FILE_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SERVED_FILE_TTL_SECS),
            shutdown_timeout_secs: get("SHUTDOWN_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SHUTDOWN_TIMEOUT_SECS),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.storage_backend == StorageBackend::Local && self.local_storage_path.is_empty() {
            return Err(anyhow::anyhow!(
                "LOCAL_STORAGE_PATH must be set when using local storage backend"
            ));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if self.conversion_topic.is_empty() || self.cleanup_topic.is_empty() {
            return Err(anyhow::anyhow!("Queue topic names must not be empty"));
        }

        if self.conversion_topic == self.cleanup_topic {
            return Err(anyhow::anyhow!(
                "QUEUE_CONVERSION_TOPIC and QUEUE_CLEANUP_TOPIC must differ"
            ));
        }

        if self.queue_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("QUEUE_POLL_INTERVAL_MS must be greater than 0"));
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn queue_retention(&self) -> Option<Duration> {
        (self.queue_retention_secs > 0).then(|| Duration::from_secs(self.queue_retention_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/phonon")]).unwrap();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.max_upload_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.converter_target_format, AudioFormat::Wav);
        assert_eq!(config.conversion_topic, "audio_conversion");
        assert_eq!(config.cleanup_topic, "janitor");
        assert_eq!(config.queue_max_redeliveries, 0);
        assert_eq!(config.queue_backend, QueueBackend::Postgres);
        assert_eq!(config.queue_retention(), Some(Duration::from_secs(604_800)));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.is_production());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_database_url() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgresql://db/phonon"),
            ("PORT", "9000"),
            ("MAX_UPLOAD_SIZE_MB", "2"),
            ("CONVERTER_TARGET_FORMAT", "M4A"),
            ("QUEUE_BACKEND", "memory"),
            ("QUEUE_MAX_REDELIVERIES", "3"),
            ("LOG_FORMAT", "json"),
            ("ENVIRONMENT", "production"),
        ])
        .unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.max_upload_size_bytes, 2 * 1024 * 1024);
        assert_eq!(config.converter_target_format, AudioFormat::M4a);
        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert_eq!(config.queue_max_redeliveries, 3);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.is_production());
    }

    #[test]
    fn test_queue_retention() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/phonon"),
            ("QUEUE_RETENTION_SECS", "3600"),
        ])
        .unwrap();
        assert_eq!(config.queue_retention(), Some(Duration::from_secs(3600)));

        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/phonon"),
            ("QUEUE_RETENTION_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.queue_retention(), None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("DATABASE_URL", "postgres://x"), ("PORT", "abc")]).is_err());
        assert!(load(&[
            ("DATABASE_URL", "postgres://x"),
            ("CONVERTER_TARGET_FORMAT", "ogg")
        ])
        .is_err());
    }

    #[test]
    fn test_validate_rejects_bad_database_url() {
        let config = load(&[("DATABASE_URL", "mysql://localhost/phonon")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_topic() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/phonon"),
            ("QUEUE_CLEANUP_TOPIC", "audio_conversion"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }
}
