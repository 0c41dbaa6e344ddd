//! Phonon Core Library
//!
//! Domain models, queue payloads, the error taxonomy and configuration shared
//! by every Phonon component.

pub mod config;
pub mod error;
pub mod job_error;
pub mod models;
pub mod storage_types;

pub use config::{Config, LogFormat};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::{JobError, JobResultExt};
pub use storage_types::{QueueBackend, StorageBackend};
