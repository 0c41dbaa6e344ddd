//! Test helpers: build the application over in-memory backends.
//!
//! No database or ffmpeg is needed: the record store, blob store and queue
//! are the in-memory implementations and the converter copies bytes.

pub mod fixtures;

use axum_test::TestServer;
use phonon_api::{assemble, Application, Backends};
use phonon_core::models::AudioFormat;
use phonon_core::Config;
use phonon_db::test_helpers::InMemoryAudioRecordStore;
use phonon_db::AudioRecordStore;
use phonon_processing::test_helpers::CopyConverter;
use phonon_storage::MemoryStorage;
use phonon_worker::{MemoryQueue, RedeliveryPolicy, QueueHandles};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Test application: server plus handles on the backends behind it
pub struct TestApp {
    pub server: TestServer,
    pub app: Application,
    pub store: Arc<InMemoryAudioRecordStore>,
    pub storage: Arc<MemoryStorage>,
    pub converter: Arc<CopyConverter>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Poll until the record for the key has left the `Ongoing` state
    pub async fn wait_for_conversion(&self, user_id: i64, phrase_id: i64) {
        use phonon_core::models::ConversionStatus;
        use phonon_db::AudioRecordStore;

        for _ in 0..200 {
            if let Ok(Some(record)) = self.store.get(user_id, phrase_id).await {
                if record.status != ConversionStatus::Ongoing {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conversion for {}/{} did not finish", user_id, phrase_id);
    }
}

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://unused@localhost/unused".to_string(),
        ),
        ("QUEUE_BACKEND".to_string(), "memory".to_string()),
        ("MAX_UPLOAD_SIZE_MB".to_string(), "1".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_source(|key| vars.get(key).cloned()).expect("test config")
}

/// Setup test app with in-process consumers
pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(test_config(&[])).await
}

pub async fn setup_test_app_with(config: Config) -> TestApp {
    let store = Arc::new(InMemoryAudioRecordStore::new());
    let storage = Arc::new(MemoryStorage::new());
    let converter = Arc::new(CopyConverter::new(storage.clone(), AudioFormat::Wav));
    let queue = Arc::new(MemoryQueue::new(RedeliveryPolicy::new(
        config.queue_max_redeliveries,
    )));

    let app = assemble(
        config,
        Backends {
            store: store.clone(),
            storage: storage.clone(),
            queue: QueueHandles {
                producer: queue.clone(),
                consumer: queue,
            },
            converter: Some(converter.clone()),
        },
    );

    let server = TestServer::new(app.router.clone()).expect("Failed to create test server");

    TestApp {
        server,
        app,
        store,
        storage,
        converter,
    }
}
