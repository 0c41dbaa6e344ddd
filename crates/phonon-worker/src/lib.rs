//! Phonon Worker
//!
//! Queue contract and backends, the consumer runner, and the two message
//! handlers: [`ConversionHandler`] (Conversion Worker) and [`CleanupHandler`]
//! (Cleanup Janitor).

pub mod conversion;
pub mod factory;
pub mod janitor;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod runner;

pub use conversion::ConversionHandler;
pub use factory::{create_queue, QueueHandles};
pub use janitor::CleanupHandler;
pub use memory::MemoryQueue;
pub use postgres::{PgQueue, PgQueueConfig};
pub use queue::{
    publish_json, Consumer, DeliveryMode, Message, MessageHandler, MessageOptions, Producer,
    QueueError, RedeliveryPolicy,
};
pub use runner::ConsumerHandle;
