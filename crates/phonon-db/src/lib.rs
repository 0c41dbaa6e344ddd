//! Phonon Database Layer
//!
//! Record Store contract and its PostgreSQL implementation, plus the
//! repository backing the PostgreSQL message queue.

pub mod db;
pub mod store;
pub mod test_helpers;

pub use db::{
    NewQueueMessage, PgAudioRecordRepository, QueueMessage, QueueMessageRepository,
    QueueMessageStatus, QUEUE_NOTIFY_CHANNEL,
};
pub use store::{AudioRecordStore, FinalizeOutcome, RecordStoreError, RecordStoreResult};
