//! # Messaging Module
//!
//! Queue contract for shard fan-out plus two implementations: an in-process
//! queue for local runs and tests, and a PostgreSQL message queue (pgmq).

pub mod errors;
pub mod in_memory_queue;
pub mod message;
#[cfg(feature = "postgres")]
pub mod pgmq_client;
pub mod queue;

pub use errors::{QueueError, QueueResult};
pub use in_memory_queue::{InMemoryTaskQueue, TaskDeliveries};
pub use message::{ShardTask, ShardTaskMetadata, TaskHandle};
#[cfg(feature = "postgres")]
pub use pgmq_client::PgmqTaskQueue;
pub use queue::TaskQueue;
