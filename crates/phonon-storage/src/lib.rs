//! Phonon Storage Library
//!
//! Blob store contract and backends for uploaded and converted audio.
//!
//! # Storage key format
//!
//! A blob's URI is its storage key. All backends share the layout produced by
//! the `keys` module:
//!
//! - **Uploaded original**: `audio/{user_id}/{phrase_id}/{upload_id}/original.{ext}`
//! - **Converted rendition**: `audio/{user_id}/{phrase_id}/{upload_id}/stored.{ext}`
//! - **Served copy**: `served/{uuid}.{ext}`
//!
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
pub mod traits;

pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use phonon_core::StorageBackend;
pub use traits::{ByteStream, Storage, StorageError, StorageReader, StorageResult};
