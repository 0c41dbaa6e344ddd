//! Converter stand-ins for tests
//!
//! [`CopyConverter`] "converts" by copying the input blob to the converted
//! key, so pipeline tests run without an ffmpeg binary.

use crate::converter::{ConversionError, ConversionResult, FormatConverter};
use async_trait::async_trait;
use phonon_core::models::AudioFormat;
use phonon_storage::{keys, Storage, StorageError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct CopyConverter {
    storage: Arc<dyn Storage>,
    target: AudioFormat,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl CopyConverter {
    pub fn new(storage: Arc<dyn Storage>, target: AudioFormat) -> Self {
        Self {
            storage,
            target,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every following conversion fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormatConverter for CopyConverter {
    async fn convert(&self, input_uri: &str) -> ConversionResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConversionError::Ffmpeg("simulated failure".to_string()));
        }
        let output_key = keys::converted_key(input_uri, self.target);
        self.storage
            .copy(input_uri, &output_key)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(key) => ConversionError::InputNotFound(key),
                other => ConversionError::Storage(other),
            })?;
        Ok(output_key)
    }

    fn target_format(&self) -> AudioFormat {
        self.target
    }
}
