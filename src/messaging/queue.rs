use crate::messaging::errors::QueueResult;
use crate::messaging::message::{ShardTask, TaskHandle};
use async_trait::async_trait;
use std::time::Duration;

/// Task queue accepting one task per shard
///
/// Delivery is assumed at-least-once: a submitted task may reach workers more
/// than once, and workers must tolerate that.
///
/// Implementations:
/// - [`InMemoryTaskQueue`](crate::messaging::InMemoryTaskQueue) for local runs and tests
/// - `PgmqTaskQueue` for PostgreSQL message queues
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task, giving up once `deadline` has elapsed
    async fn submit(&self, task: &ShardTask, deadline: Duration) -> QueueResult<TaskHandle>;

    /// Name of the queue tasks are submitted to
    fn queue_name(&self) -> &str;
}
