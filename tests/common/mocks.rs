//! Test doubles for the queue and the entity store.

use async_trait::async_trait;
use disburse_core::messaging::{
    InMemoryTaskQueue, QueueError, QueueResult, ShardTask, TaskHandle, TaskQueue,
};
use disburse_core::models::{EntityKey, KeyedEntity, ShardId};
use disburse_core::store::{EntityStore, InMemoryEntityStore, StoreError, StoreResult, WriteOutcome};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Queue that rejects or stalls submissions for chosen shards and forwards
/// everything else to an in-memory queue
pub struct FlakyQueue {
    inner: Arc<InMemoryTaskQueue>,
    rejected: Mutex<HashSet<ShardId>>,
    stalled: Mutex<HashSet<ShardId>>,
    attempts: AtomicUsize,
}

impl FlakyQueue {
    pub fn new(inner: Arc<InMemoryTaskQueue>) -> Self {
        Self {
            inner,
            rejected: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn reject(self, shard_id: ShardId) -> Self {
        self.rejected.lock().insert(shard_id);
        self
    }

    /// Never acknowledge `shard_id`; the submission outlives any deadline
    pub fn stall(self, shard_id: ShardId) -> Self {
        self.stalled.lock().insert(shard_id);
        self
    }

    /// Accept every shard from now on
    pub fn heal(&self) {
        self.rejected.lock().clear();
        self.stalled.lock().clear();
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn submit(&self, task: &ShardTask, deadline: Duration) -> QueueResult<TaskHandle> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.rejected.lock().contains(&task.shard_id) {
            return Err(QueueError::queue_operation(
                self.inner.queue_name(),
                "submit",
                "broker unavailable",
            ));
        }
        let stalled = self.stalled.lock().contains(&task.shard_id);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.submit(task, deadline).await
    }

    fn queue_name(&self) -> &str {
        self.inner.queue_name()
    }
}

/// Store that reports per-key failures for chosen entity names and fails
/// whole calls containing a poisoned name
pub struct SelectiveFailingStore {
    inner: Arc<InMemoryEntityStore>,
    failing: HashSet<String>,
    poisoned: HashSet<String>,
    calls: AtomicUsize,
}

impl SelectiveFailingStore {
    pub fn new(inner: Arc<InMemoryEntityStore>) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
            poisoned: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn poisoned(mut self, name: impl Into<String>) -> Self {
        self.poisoned.insert(name.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for SelectiveFailingStore {
    async fn write_many(&self, entities: &[KeyedEntity]) -> StoreResult<Vec<WriteOutcome>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if entities.iter().any(|e| self.poisoned.contains(&e.key.name)) {
            return Err(StoreError::database("write_many", "connection reset"));
        }

        let (rejected, accepted): (Vec<&KeyedEntity>, Vec<&KeyedEntity>) = entities
            .iter()
            .partition(|e| self.failing.contains(&e.key.name));

        let accepted: Vec<KeyedEntity> = accepted.into_iter().cloned().collect();
        let mut outcomes = self.inner.write_many(&accepted).await?;
        outcomes.extend(
            rejected
                .into_iter()
                .map(|e| WriteOutcome::failed(e.key.clone(), "quota exceeded")),
        );
        Ok(outcomes)
    }
}

/// Entity key name minted by `SequentialKeyGenerator::new(prefix)` for the n-th row (1-based)
pub fn sequential_name(prefix: &str, n: usize) -> String {
    format!("{prefix}-{n:08}")
}

pub fn sequential_key(prefix: &str, kind: &str, n: usize) -> EntityKey {
    EntityKey::new(kind, sequential_name(prefix, n))
}
