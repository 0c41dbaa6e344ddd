//! Application state shared by every handler

use phonon_core::Config;
use phonon_services::AudioService;
use phonon_storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub audio: AudioService,
}

impl AppState {
    pub fn new(config: Config, audio: AudioService) -> Arc<Self> {
        Arc::new(Self { config, audio })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.audio.storage()
    }
}
