//! # Worker Runner
//!
//! Consumes delivered shard tasks and executes them on a [`ShardWorker`],
//! at most `max_concurrent_shards` at a time. Each terminal result is
//! forwarded to the reconciliation channel.
//!
//! The runner stops when the delivery channel closes or shutdown is
//! signalled, then waits for in-flight shards to finish.

use crate::logging::log_error;
use crate::messaging::TaskDeliveries;
use crate::models::ShardResult;
use crate::orchestration::ShardWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counters reported when the runner stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub tasks_received: usize,
    pub shards_completed: usize,
    pub shards_failed: usize,
}

pub struct WorkerRunner {
    worker: Arc<ShardWorker>,
    max_concurrent_shards: usize,
}

impl WorkerRunner {
    pub fn new(worker: Arc<ShardWorker>, max_concurrent_shards: usize) -> Self {
        Self {
            worker,
            max_concurrent_shards: max_concurrent_shards.max(1),
        }
    }

    pub async fn run(
        self,
        mut deliveries: TaskDeliveries,
        results: mpsc::UnboundedSender<ShardResult>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunnerStats {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_shards));
        let mut in_flight: JoinSet<bool> = JoinSet::new();
        let mut stats = RunnerStats::default();

        info!(max_concurrent_shards = self.max_concurrent_shards, "Worker runner started");

        loop {
            let task = tokio::select! {
                task = deliveries.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            stats.tasks_received += 1;

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let worker = self.worker.clone();
            let results = results.clone();

            in_flight.spawn(async move {
                let _permit = permit;
                let shard_id = task.shard_id.clone();
                match worker.handle_task(task).await {
                    Ok(result) => {
                        if results.send(result).is_err() {
                            debug!(shard_id = %shard_id, "Result receiver dropped");
                        }
                        true
                    }
                    Err(e) => {
                        log_error("WorkerRunner", "process_shard", &e.to_string(), Some(shard_id.as_str()));
                        false
                    }
                }
            });

            // Reap finished shards so the set does not grow with the job
            while let Some(done) = in_flight.try_join_next() {
                stats.record(done);
            }
        }

        while let Some(done) = in_flight.join_next().await {
            stats.record(done);
        }

        info!(
            tasks_received = stats.tasks_received,
            shards_completed = stats.shards_completed,
            shards_failed = stats.shards_failed,
            "Worker runner stopped"
        );
        stats
    }
}

#[cfg(feature = "postgres")]
impl WorkerRunner {
    /// Read tasks from a pgmq queue until shutdown
    ///
    /// A task is deleted only after its shard reached a terminal state; a
    /// failed shard stays on the queue and is delivered again once its
    /// visibility timeout expires.
    pub async fn run_pgmq(
        self,
        queue: Arc<crate::messaging::PgmqTaskQueue>,
        visibility_timeout_seconds: i32,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunnerStats {
        let mut stats = RunnerStats::default();
        let batch_size = i32::try_from(self.max_concurrent_shards).unwrap_or(i32::MAX);

        info!(
            queue = %crate::messaging::TaskQueue::queue_name(queue.as_ref()),
            max_concurrent_shards = self.max_concurrent_shards,
            "pgmq worker runner started"
        );

        while !*shutdown.borrow() {
            let batch = match queue.read_tasks(visibility_timeout_seconds, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Failed to read shard tasks");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            stats.tasks_received += batch.len();

            let handled = futures::future::join_all(batch.into_iter().map(|(message_id, task)| {
                let worker = self.worker.clone();
                async move {
                    let shard_id = task.shard_id.clone();
                    (message_id, shard_id, worker.handle_task(task).await)
                }
            }))
            .await;

            for (message_id, shard_id, outcome) in handled {
                match outcome {
                    Ok(_) => {
                        stats.shards_completed += 1;
                        if let Err(e) = queue.delete_task(message_id).await {
                            warn!(shard_id = %shard_id, message_id, error = %e, "Failed to delete processed task");
                        }
                    }
                    Err(e) => {
                        stats.shards_failed += 1;
                        log_error("WorkerRunner", "process_shard", &e.to_string(), Some(shard_id.as_str()));
                        // A task that fails validation fails on every delivery
                        if matches!(e, crate::error::DisburseError::Validation(_)) {
                            if let Err(e) = queue.archive_task(message_id).await {
                                warn!(shard_id = %shard_id, message_id, error = %e, "Failed to archive rejected task");
                            }
                        }
                    }
                }
            }
        }

        info!(
            tasks_received = stats.tasks_received,
            shards_completed = stats.shards_completed,
            shards_failed = stats.shards_failed,
            "pgmq worker runner stopped"
        );
        stats
    }
}

impl RunnerStats {
    fn record(&mut self, done: Result<bool, tokio::task::JoinError>) {
        match done {
            Ok(true) => self.shards_completed += 1,
            Ok(false) => self.shards_failed += 1,
            Err(e) => {
                warn!(error = %e, "Shard task panicked or was cancelled");
                self.shards_failed += 1;
            }
        }
    }
}
