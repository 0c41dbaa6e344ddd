use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::AppError;

/// Audio encodings accepted for upload and storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    M4a,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::M4a => "m4a",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::M4a => "audio/mp4",
        }
    }

    /// Derive the format from a filename or URI extension.
    ///
    /// Only the text after the last dot counts, so `take.audio.m4a` is M4A.
    /// Returns `None` for no extension, a trailing dot, or an unsupported one.
    pub fn from_filename(filename: &str) -> Option<Self> {
        extract_extension(filename).and_then(|ext| ext.parse().ok())
    }
}

/// Text after the last dot of the final path segment, if any.
pub fn extract_extension(filename: &str) -> Option<&str> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext),
        _ => None,
    }
}

impl Display for AudioFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "m4a" => Ok(AudioFormat::M4a),
            _ => Err(AppError::InvalidFormat(format!(
                "Unsupported audio format: {}",
                s
            ))),
        }
    }
}

/// Lifecycle of an audio record.
///
/// Transitions are monotonic: `Ongoing -> Completed` or `Ongoing -> Deleted`.
/// `Deleted` is reserved; nothing in this workspace moves a record into it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "conversion_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Ongoing,
    Completed,
    Deleted,
}

impl Display for ConversionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ConversionStatus::Ongoing => write!(f, "ongoing"),
            ConversionStatus::Completed => write!(f, "completed"),
            ConversionStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for ConversionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ongoing" => Ok(ConversionStatus::Ongoing),
            "completed" => Ok(ConversionStatus::Completed),
            "deleted" => Ok(ConversionStatus::Deleted),
            _ => Err(anyhow::anyhow!("Invalid conversion status: {}", s)),
        }
    }
}

/// One user's recording of one phrase, keyed by `(user_id, phrase_id)`.
///
/// `stored_uri` is empty until the record is `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioRecord {
    pub user_id: i64,
    pub phrase_id: i64,
    pub original_filename: String,
    pub original_format: AudioFormat,
    pub original_uri: String,
    pub stored_uri: String,
    pub status: ConversionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for AudioRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(AudioRecord {
            user_id: row.try_get("user_id")?,
            phrase_id: row.try_get("phrase_id")?,
            original_filename: row.try_get("original_filename")?,
            original_format: row
                .try_get::<String, _>("original_format")?
                .parse()
                .map_err(|e: AppError| {
                    sqlx::Error::Decode(format!("Failed to parse original_format: {}", e).into())
                })?,
            original_uri: row.try_get("original_uri")?,
            stored_uri: row
                .try_get::<Option<String>, _>("stored_uri")?
                .unwrap_or_default(),
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl AudioRecord {
    /// Build the initial `Ongoing` record for a freshly uploaded blob
    pub fn ongoing(new: NewAudioRecord) -> Self {
        let now = Utc::now();
        AudioRecord {
            user_id: new.user_id,
            phrase_id: new.phrase_id,
            original_filename: new.original_filename,
            original_format: new.original_format,
            original_uri: new.original_uri,
            stored_uri: String::new(),
            status: ConversionStatus::Ongoing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ConversionStatus::Completed
    }

    /// Format of the converted blob, derived from the stored URI's extension
    pub fn stored_format(&self) -> Option<AudioFormat> {
        if self.stored_uri.is_empty() {
            return None;
        }
        AudioFormat::from_filename(&self.stored_uri)
    }
}

/// Fields supplied by ingestion when creating a record
#[derive(Debug, Clone)]
pub struct NewAudioRecord {
    pub user_id: i64,
    pub phrase_id: i64,
    pub original_filename: String,
    pub original_format: AudioFormat,
    pub original_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
}

/// Short-lived link to a served rendition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServedAudioLink {
    pub url: String,
    pub expires_in_secs: u64,
}
