//! Phonon Services Layer
//!
//! Business logic between the HTTP adapter and the storage, record and queue
//! backends. Handlers stay thin and call into [`AudioService`].

pub mod audio;

pub use audio::{AudioService, AudioServiceConfig};
