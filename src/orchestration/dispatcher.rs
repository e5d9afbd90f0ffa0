//! # Dispatcher
//!
//! Synthesizes one [`Shard`] per chunk of a [`ProcessRequest`] and submits
//! each as an independent task. Submissions run concurrently; a failure or
//! deadline on one shard never affects the others and is reported per shard.
//!
//! Shard ids double as idempotency keys. A shard the queue has already
//! acknowledged, or one the ledger already records as dispatched or beyond,
//! is not submitted again by a repeated `dispatch`, whether from this
//! dispatcher or a restarted one sharing the ledger. Concurrent dispatches of
//! the same shard are serialized on a per-shard slot. Only
//! [`Dispatcher::resubmit`] sends an acknowledged shard a second time.

use crate::config::ConfigManager;
use crate::constants::{operations, DEFAULT_SUBMISSION_DEADLINE};
use crate::error::DispatchError;
use crate::keys::KeyGenerator;
use crate::logging::{log_error, log_job_operation};
use crate::messaging::{ShardTask, TaskHandle, TaskQueue};
use crate::models::{ProcessRequest, Shard, ShardId};
use crate::state_machine::{ShardEvent, ShardState};
use crate::store::ShardLedger;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Bound on a single queue submission
    pub submission_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            submission_deadline: DEFAULT_SUBMISSION_DEADLINE,
        }
    }
}

impl DispatcherConfig {
    pub fn from_config_manager(config_manager: &ConfigManager) -> Self {
        Self {
            submission_deadline: config_manager.config().dispatch.submission_deadline(),
        }
    }
}

/// An acknowledged shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardHandle {
    pub shard_id: ShardId,
    pub chunk_index: usize,
    /// Target sum of the shard's rows
    pub amount: i64,
    pub child_count: usize,
    /// Queue acknowledgement; `None` when the ledger showed the shard already dispatched
    pub task: Option<TaskHandle>,
    /// Acknowledged by an earlier dispatch of the same request
    pub previously_acknowledged: bool,
}

/// Result of dispatching one request
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub job_id: String,
    /// Acknowledged shards in chunk order
    pub shards: Vec<ShardHandle>,
    /// Shards whose submission failed, in chunk order
    pub failed_shard_ids: Vec<ShardId>,
    pub errors: Vec<DispatchError>,
    pub duration_ms: u64,
}

impl DispatchOutcome {
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.iter().map(|h| h.shard_id.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_shard_ids.is_empty()
    }
}

enum Submission {
    Acknowledged(ShardHandle),
    Failed(DispatchError),
}

/// Submission bookkeeping for one shard id
#[derive(Debug, Default)]
struct ShardSlot {
    acknowledged: Option<TaskHandle>,
    attempts: u32,
}

pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    ledger: Arc<dyn ShardLedger>,
    keys: Arc<dyn KeyGenerator>,
    config: DispatcherConfig,
    slots: DashMap<ShardId, Arc<Mutex<ShardSlot>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        ledger: Arc<dyn ShardLedger>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self::with_config(queue, ledger, keys, DispatcherConfig::default())
    }

    pub fn with_config(
        queue: Arc<dyn TaskQueue>,
        ledger: Arc<dyn ShardLedger>,
        keys: Arc<dyn KeyGenerator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            keys,
            config,
            slots: DashMap::new(),
        }
    }

    /// Build the `Created` shards for every chunk of `request`
    pub fn shards_for(&self, request: &ProcessRequest) -> Vec<Shard> {
        request
            .entity_chunks()
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                Shard::from_chunk(
                    self.keys.shard_id(request.job_id(), index),
                    request.job_id(),
                    index,
                    request.kind(),
                    request.payload_type(),
                    chunk,
                )
            })
            .collect()
    }

    /// Queue acknowledgement recorded for `shard_id`, if any
    pub async fn acknowledgement(&self, shard_id: &ShardId) -> Option<TaskHandle> {
        let slot = self.slots.get(shard_id).map(|entry| entry.value().clone())?;
        let slot = slot.lock().await;
        slot.acknowledged.clone()
    }

    /// Drop the bookkeeping for shards that need no further submission
    ///
    /// A later `dispatch` of a released shard still consults the ledger.
    pub fn release(&self, shard_ids: &[ShardId]) {
        for shard_id in shard_ids {
            self.slots.remove(shard_id);
        }
    }

    fn slot(&self, shard_id: &ShardId) -> Arc<Mutex<ShardSlot>> {
        self.slots.entry(shard_id.clone()).or_default().value().clone()
    }

    /// Submit every shard of `request` concurrently
    #[instrument(skip(self, request), fields(job_id = %request.job_id(), chunks = request.entity_chunks().len()))]
    pub async fn dispatch(&self, request: &ProcessRequest) -> DispatchOutcome {
        let start_time = Instant::now();

        info!(
            job_id = %request.job_id(),
            queue = %self.queue.queue_name(),
            "Dispatching shards"
        );

        let submissions = self
            .shards_for(request)
            .into_iter()
            .map(|shard| self.dispatch_shard(shard));

        let outcome = self.collect(request.job_id(), join_all(submissions).await, start_time);

        log_job_operation(
            operations::DISPATCH,
            request.job_id(),
            Some(request.kind()),
            if outcome.is_complete() { "dispatched" } else { "partially_dispatched" },
            Some(&format!(
                "{} acknowledged, {} failed",
                outcome.shards.len(),
                outcome.failed_shard_ids.len()
            )),
        );

        outcome
    }

    async fn dispatch_shard(&self, shard: Shard) -> Submission {
        let slot = self.slot(shard.id());
        let mut slot = slot.lock().await;

        if let Some(task) = &slot.acknowledged {
            debug!(shard_id = %shard.id(), "Shard already acknowledged, skipping submission");
            return Submission::Acknowledged(handle_for(&shard, Some(task.clone()), true));
        }

        match self.ledger.state(shard.id()).await {
            Ok(Some(state)) if state != ShardState::Created => {
                debug!(shard_id = %shard.id(), state = %state, "Ledger shows shard already dispatched, skipping submission");
                return Submission::Acknowledged(handle_for(&shard, None, true));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(shard_id = %shard.id(), error = %e, "Ledger state unavailable, submitting anyway");
            }
        }

        slot.attempts += 1;
        let submission = self.submit_shard(shard, slot.attempts).await;
        if let Submission::Acknowledged(handle) = &submission {
            slot.acknowledged = handle.task.clone();
        }
        submission
    }

    /// Submit the named shards of `request` again, acknowledged or not
    ///
    /// Shard ids that do not belong to `request` are reported as
    /// [`DispatchError::UnknownShard`].
    #[instrument(skip(self, request), fields(job_id = %request.job_id(), shards = shard_ids.len()))]
    pub async fn resubmit(&self, request: &ProcessRequest, shard_ids: &[ShardId]) -> DispatchOutcome {
        let start_time = Instant::now();
        let mut shards = self.shards_for(request);
        let mut seen = HashSet::new();

        let submissions = shard_ids.iter().filter(|id| seen.insert(*id)).map(|shard_id| {
            let shard = shards
                .iter()
                .position(|s| s.id() == shard_id)
                .map(|index| shards.swap_remove(index));
            let job_id = request.job_id().to_string();
            let shard_id = shard_id.clone();

            async move {
                let Some(shard) = shard else {
                    return Submission::Failed(DispatchError::UnknownShard { shard_id, job_id });
                };
                let slot = self.slot(&shard_id);
                let mut slot = slot.lock().await;
                slot.attempts = slot.attempts.max(1) + 1;
                let submission = self.submit_shard(shard, slot.attempts).await;
                if let Submission::Acknowledged(handle) = &submission {
                    slot.acknowledged = handle.task.clone();
                }
                submission
            }
        });
        let submissions: Vec<_> = submissions.collect();

        let outcome = self.collect(request.job_id(), join_all(submissions).await, start_time);

        log_job_operation(
            operations::RESUBMIT,
            request.job_id(),
            Some(request.kind()),
            if outcome.is_complete() { "resubmitted" } else { "partially_resubmitted" },
            Some(&format!(
                "{} acknowledged, {} failed",
                outcome.shards.len(),
                outcome.failed_shard_ids.len()
            )),
        );

        outcome
    }

    async fn submit_shard(&self, mut shard: Shard, attempt: u32) -> Submission {
        let shard_id = shard.id().clone();
        let deadline = self.config.submission_deadline;
        let task = ShardTask::from_shard(&shard).with_attempt(attempt);

        let submitted = tokio::time::timeout(deadline, self.queue.submit(&task, deadline)).await;
        let handle = match submitted {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) if e.is_timeout() => {
                return Submission::Failed(DispatchError::DeadlineExceeded {
                    shard_id,
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
            Ok(Err(e)) => {
                return Submission::Failed(DispatchError::SubmissionFailed {
                    shard_id,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Submission::Failed(DispatchError::DeadlineExceeded {
                    shard_id,
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
        };

        if let Err(e) = shard.apply(ShardEvent::Dispatch) {
            warn!(shard_id = %shard_id, error = %e, "Shard state not advanced after submission");
        }
        // The ledger may already be ahead if a worker picked the task up first
        if let Err(e) = self.ledger.mark_state(&shard_id, ShardState::Dispatched).await {
            warn!(shard_id = %shard_id, error = %e, "Failed to record dispatched state");
        }

        debug!(
            shard_id = %shard_id,
            message_id = handle.message_id,
            attempt = attempt,
            "Shard acknowledged by queue"
        );

        Submission::Acknowledged(handle_for(&shard, Some(handle), false))
    }

    fn collect(&self, job_id: &str, submissions: Vec<Submission>, start_time: Instant) -> DispatchOutcome {
        let mut shards = Vec::new();
        let mut failed_shard_ids = Vec::new();
        let mut errors = Vec::new();

        for submission in submissions {
            match submission {
                Submission::Acknowledged(handle) => shards.push(handle),
                Submission::Failed(error) => {
                    log_error(
                        "Dispatcher",
                        operations::DISPATCH,
                        &error.to_string(),
                        Some(job_id),
                    );
                    failed_shard_ids.push(error.shard_id().clone());
                    errors.push(error);
                }
            }
        }

        DispatchOutcome {
            job_id: job_id.to_string(),
            shards,
            failed_shard_ids,
            errors,
            duration_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

fn handle_for(shard: &Shard, task: Option<TaskHandle>, previously_acknowledged: bool) -> ShardHandle {
    ShardHandle {
        shard_id: shard.id().clone(),
        chunk_index: shard.chunk_index(),
        amount: shard.amount(),
        child_count: shard.children().len(),
        task,
        previously_acknowledged,
    }
}
