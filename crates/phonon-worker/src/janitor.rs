//! Cleanup Janitor: deletes ephemeral served blobs

use async_trait::async_trait;
use phonon_core::models::{CleanupMessage, JobPayload};
use phonon_core::{JobError, JobResultExt};
use phonon_storage::{keys, Storage, StorageError};
use std::sync::Arc;

use crate::queue::{Message, MessageHandler};

pub struct CleanupHandler {
    storage: Arc<dyn Storage>,
}

impl CleanupHandler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MessageHandler for CleanupHandler {
    async fn handle(&self, message: &Message) -> Result<(), JobError> {
        let cleanup = CleanupMessage::decode(&message.value)
            .map_err(|e| {
                tracing::error!(error = %e, message_id = ?message.id, "Malformed cleanup message");
                anyhow::Error::from(e)
            })
            .permanent()?;

        if !keys::is_served_key(&cleanup.uri) {
            tracing::error!(uri = %cleanup.uri, "Refusing to delete a key outside served/");
            return Err(JobError::permanent(StorageError::InvalidKey(cleanup.uri)));
        }

        match self.storage.delete(&cleanup.uri).await {
            Ok(()) => {
                tracing::info!(uri = %cleanup.uri, "Served file deleted");
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(uri = %cleanup.uri, "Served file already gone");
                Ok(())
            }
            Err(e @ StorageError::InvalidKey(_)) => {
                tracing::error!(error = %e, uri = %cleanup.uri, "Invalid served file key");
                Err(JobError::permanent(e))
            }
            Err(e) => {
                tracing::error!(error = %e, uri = %cleanup.uri, "Failed to delete served file");
                Err(JobError::transient(e))
            }
        }
    }
}
