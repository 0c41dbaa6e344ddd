//! In-memory blob store.
//!
//! Used by tests and single-process development runs. Contents are lost when
//! the process exits.

use crate::keys;
use crate::traits::{ByteStream, Storage, StorageError, StorageReader, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use phonon_core::models::AudioFormat;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a blob's contents
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    fn check_key(key: &str) -> StorageResult<()> {
        if keys::is_safe_key(key) {
            Ok(())
        } else {
            Err(StorageError::InvalidKey(key.to_string()))
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(
        &self,
        user_id: i64,
        phrase_id: i64,
        format: AudioFormat,
        mut reader: StorageReader,
    ) -> StorageResult<String> {
        let key = keys::original_key(user_id, phrase_id, format);
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        self.blobs.write().await.insert(key.clone(), data);
        Ok(key)
    }

    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<String> {
        Self::check_key(storage_key)?;
        self.blobs
            .write()
            .await
            .insert(storage_key.to_string(), data);
        Ok(storage_key.to_string())
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        Self::check_key(storage_key)?;
        self.get(storage_key)
            .await
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let data = self.download(storage_key).await?;
        let chunk: Result<Bytes, StorageError> = Ok(Bytes::from(data));
        Ok(Box::pin(futures::stream::iter(vec![chunk])))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        Self::check_key(storage_key)?;
        match self.blobs.write().await.remove(storage_key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(storage_key.to_string())),
        }
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        Self::check_key(storage_key)?;
        Ok(self.blobs.read().await.contains_key(storage_key))
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<String> {
        Self::check_key(to_key)?;
        let data = self.download(from_key).await?;
        self.blobs.write().await.insert(to_key.to_string(), data);
        Ok(to_key.to_string())
    }

    async fn public_url(&self, storage_key: &str, _expires_in: Duration) -> StorageResult<String> {
        Self::check_key(storage_key)?;
        Ok(format!("memory://{}", storage_key))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
