//! # PostgreSQL Message Queue Client
//!
//! Task queue over the pgmq extension's SQL functions, sharing the caller's
//! connection pool.

use crate::messaging::errors::{QueueError, QueueResult};
use crate::messaging::message::{ShardTask, TaskHandle};
use crate::messaging::queue::TaskQueue;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// pgmq-backed shard task queue
#[derive(Debug, Clone)]
pub struct PgmqTaskQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgmqTaskQueue {
    /// Create new queue client using existing connection pool (BYOP - Bring Your Own Pool)
    pub fn new_with_pool(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    /// Create queue if it doesn't exist
    pub async fn create_queue(&self) -> QueueResult<()> {
        debug!("Creating queue: {}", self.queue_name);

        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await?;

        info!("Queue created: {}", self.queue_name);
        Ok(())
    }

    /// Read up to `limit` tasks, hiding them for `visibility_timeout_seconds`
    pub async fn read_tasks(
        &self,
        visibility_timeout_seconds: i32,
        limit: i32,
    ) -> QueueResult<Vec<(i64, ShardTask)>> {
        let rows = sqlx::query("SELECT msg_id, message FROM pgmq.read($1, $2, $3)")
            .bind(&self.queue_name)
            .bind(visibility_timeout_seconds)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let messages = rows
            .into_iter()
            .map(|row| -> QueueResult<(i64, serde_json::Value)> {
                Ok((row.try_get("msg_id")?, row.try_get("message")?))
            })
            .collect::<QueueResult<Vec<_>>>()?;

        let (tasks, rejected) = decode_messages(messages);
        for (message_id, error) in rejected {
            warn!(
                queue = %self.queue_name,
                message_id,
                error = %error,
                "Archiving undecodable shard task"
            );
            if let Err(e) = self.archive_task(message_id).await {
                warn!(queue = %self.queue_name, message_id, error = %e, "Failed to archive shard task");
            }
        }
        Ok(tasks)
    }

    /// Move a task that can never be processed to the queue's archive
    pub async fn archive_task(&self, message_id: i64) -> QueueResult<bool> {
        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2)")
            .bind(&self.queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(archived)
    }

    /// Delete a processed task
    pub async fn delete_task(&self, message_id: i64) -> QueueResult<bool> {
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1, $2)")
            .bind(&self.queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(deleted)
    }
}

#[async_trait]
impl TaskQueue for PgmqTaskQueue {
    #[instrument(skip(self, task), fields(queue = %self.queue_name, shard_id = %task.shard_id))]
    async fn submit(&self, task: &ShardTask, deadline: Duration) -> QueueResult<TaskHandle> {
        let payload = task.to_json()?;

        let send = sqlx::query_scalar::<_, i64>("SELECT * FROM pgmq.send($1, $2)")
            .bind(&self.queue_name)
            .bind(&payload)
            .fetch_one(&self.pool);

        let message_id = tokio::time::timeout(deadline, send)
            .await
            .map_err(|_| QueueError::timeout("pgmq.send", deadline.as_millis() as u64))??;

        debug!(
            "Shard task sent to queue: {} with ID: {}",
            self.queue_name, message_id
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

/// Split a read batch into decodable tasks and messages that fail to decode
fn decode_messages(
    messages: Vec<(i64, serde_json::Value)>,
) -> (Vec<(i64, ShardTask)>, Vec<(i64, serde_json::Error)>) {
    let mut tasks = Vec::with_capacity(messages.len());
    let mut rejected = Vec::new();
    for (message_id, message) in messages {
        match ShardTask::from_json(message) {
            Ok(task) => tasks.push((message_id, task)),
            Err(e) => rejected.push((message_id, e)),
        }
    }
    (tasks, rejected)
}
