//! In-process task queue backed by a tokio channel.

use crate::messaging::errors::{QueueError, QueueResult};
use crate::messaging::message::{ShardTask, TaskHandle};
use crate::messaging::queue::TaskQueue;
use crate::models::ShardId;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving end handed to the worker runner
pub type TaskDeliveries = mpsc::UnboundedReceiver<ShardTask>;

#[derive(Debug)]
pub struct InMemoryTaskQueue {
    queue_name: String,
    sender: mpsc::UnboundedSender<ShardTask>,
    next_message_id: AtomicI64,
    deliveries_per_task: usize,
    submitted: Mutex<Vec<ShardId>>,
}

impl InMemoryTaskQueue {
    pub fn new(queue_name: impl Into<String>) -> (Self, TaskDeliveries) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            queue_name: queue_name.into(),
            sender,
            next_message_id: AtomicI64::new(1),
            deliveries_per_task: 1,
            submitted: Mutex::new(Vec::new()),
        };
        (queue, receiver)
    }

    /// Deliver every submitted task `deliveries` times to exercise at-least-once consumers
    pub fn with_deliveries_per_task(mut self, deliveries: usize) -> Self {
        self.deliveries_per_task = deliveries.max(1);
        self
    }

    /// Shard ids acknowledged so far, in submission order
    pub fn submitted(&self) -> Vec<ShardId> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn submit(&self, task: &ShardTask, _deadline: Duration) -> QueueResult<TaskHandle> {
        for _ in 0..self.deliveries_per_task {
            self.sender
                .send(task.clone())
                .map_err(|_| QueueError::queue_closed(&self.queue_name))?;
        }

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().push(task.shard_id.clone());

        debug!(
            queue_name = %self.queue_name,
            shard_id = %task.shard_id,
            message_id = message_id,
            deliveries = self.deliveries_per_task,
            "Task accepted by in-memory queue"
        );

        Ok(TaskHandle {
            queue_name: self.queue_name.clone(),
            message_id,
            shard_id: task.shard_id.clone(),
            submitted_at: Utc::now(),
        })
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
