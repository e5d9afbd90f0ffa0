//! External dependencies of the pipeline, bundled so they can be swapped for
//! test doubles in one place.

use crate::keys::{KeyGenerator, UuidKeyGenerator};
use crate::messaging::{InMemoryTaskQueue, TaskDeliveries, TaskQueue};
use crate::store::{EntityStore, InMemoryEntityStore, InMemoryShardLedger, ShardLedger};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::{
    error::Result,
    messaging::PgmqTaskQueue,
    store::{postgres::ensure_schema, PgEntityStore, PgShardLedger},
};
#[cfg(feature = "postgres")]
use sqlx::PgPool;

#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn TaskQueue>,
    pub store: Arc<dyn EntityStore>,
    pub ledger: Arc<dyn ShardLedger>,
    pub keys: Arc<dyn KeyGenerator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("queue", &self.queue.queue_name())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn EntityStore>,
        ledger: Arc<dyn ShardLedger>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            queue,
            store,
            ledger,
            keys,
        }
    }

    /// Single-process collaborators with UUID keys
    pub fn in_memory(queue_name: impl Into<String>) -> InMemoryBackends {
        InMemoryBackends::new(queue_name, Arc::new(UuidKeyGenerator))
    }
}

#[cfg(feature = "postgres")]
impl Collaborators {
    /// PostgreSQL tables and a pgmq queue sharing one pool, created when missing
    ///
    /// The typed queue handle is returned as well so worker processes can
    /// read and delete tasks.
    pub async fn postgres(
        pool: PgPool,
        queue_name: &str,
        keys: Arc<dyn KeyGenerator>,
    ) -> Result<(Self, Arc<PgmqTaskQueue>)> {
        ensure_schema(&pool).await?;
        let queue = Arc::new(PgmqTaskQueue::new_with_pool(pool.clone(), queue_name));
        queue.create_queue().await?;

        let collaborators = Self::new(
            queue.clone(),
            Arc::new(PgEntityStore::new(pool.clone())),
            Arc::new(PgShardLedger::new(pool)),
            keys,
        );
        Ok((collaborators, queue))
    }
}

/// In-process collaborators with typed handles kept for inspection
pub struct InMemoryBackends {
    pub collaborators: Collaborators,
    pub deliveries: TaskDeliveries,
    pub queue: Arc<InMemoryTaskQueue>,
    pub store: Arc<InMemoryEntityStore>,
    pub ledger: Arc<InMemoryShardLedger>,
}

impl InMemoryBackends {
    pub fn new(queue_name: impl Into<String>, keys: Arc<dyn KeyGenerator>) -> Self {
        let (queue, deliveries) = InMemoryTaskQueue::new(queue_name);
        Self::with_queue(queue, deliveries, keys)
    }

    pub fn with_queue(
        queue: InMemoryTaskQueue,
        deliveries: TaskDeliveries,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        let queue = Arc::new(queue);
        let store = Arc::new(InMemoryEntityStore::new());
        let ledger = Arc::new(InMemoryShardLedger::new());
        let collaborators = Collaborators::new(queue.clone(), store.clone(), ledger.clone(), keys);

        Self {
            collaborators,
            deliveries,
            queue,
            store,
            ledger,
        }
    }
}
