//! PostgreSQL repositories

pub mod audio_record;
pub mod queue_message;

pub use audio_record::PgAudioRecordRepository;
pub use queue_message::{
    NewQueueMessage, QueueMessage, QueueMessageRepository, QueueMessageStatus,
    QUEUE_NOTIFY_CHANNEL,
};
