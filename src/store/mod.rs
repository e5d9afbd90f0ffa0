//! # Store Contracts
//!
//! The batch-capable key-value store shard workers write entities into, and
//! the ledger recording shard lifecycle and terminal results.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::constants::MAX_WRITE_BATCH_SIZE;
use crate::models::{EntityKey, KeyedEntity, ShardId, ShardResult};
use crate::state_machine::ShardState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use in_memory::{InMemoryEntityStore, InMemoryShardLedger};
#[cfg(feature = "postgres")]
pub use postgres::{PgEntityStore, PgShardLedger};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Write batch of {size} entities exceeds the store limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::database("query", err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reject batches above the store's per-call limit
pub fn ensure_within_write_limit(size: usize) -> StoreResult<()> {
    if size > MAX_WRITE_BATCH_SIZE {
        return Err(StoreError::BatchTooLarge {
            size,
            max: MAX_WRITE_BATCH_SIZE,
        });
    }
    Ok(())
}

/// Per-key result of a batch write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub key: EntityKey,
    /// `None` when the entity was written
    pub error: Option<String>,
}

impl WriteOutcome {
    pub fn written(key: EntityKey) -> Self {
        Self { key, error: None }
    }

    pub fn failed(key: EntityKey, reason: impl Into<String>) -> Self {
        Self {
            key,
            error: Some(reason.into()),
        }
    }

    pub fn is_written(&self) -> bool {
        self.error.is_none()
    }
}

/// Batch-capable key-value store
///
/// Writes are keyed: writing an existing key overwrites it, so replaying a
/// batch with the same keys never duplicates entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write up to 500 entities, reporting success or failure per key
    async fn write_many(&self, entities: &[KeyedEntity]) -> StoreResult<Vec<WriteOutcome>>;
}

/// Durable record of shard lifecycle
#[async_trait]
pub trait ShardLedger: Send + Sync {
    /// Advance the recorded state; never moves a shard backwards
    async fn mark_state(&self, shard_id: &ShardId, state: ShardState) -> StoreResult<()>;

    async fn state(&self, shard_id: &ShardId) -> StoreResult<Option<ShardState>>;

    /// Terminal marker observed by re-delivered tasks
    async fn terminal_result(&self, shard_id: &ShardId) -> StoreResult<Option<ShardResult>>;

    /// Record a terminal result; the first recorded result wins and is returned
    async fn record_terminal(&self, result: ShardResult) -> StoreResult<ShardResult>;

    /// Terminal results for whichever of `shard_ids` have one
    async fn terminal_results(&self, shard_ids: &[ShardId]) -> StoreResult<Vec<ShardResult>> {
        let mut results = Vec::with_capacity(shard_ids.len());
        for shard_id in shard_ids {
            if let Some(result) = self.terminal_result(shard_id).await? {
                results.push(result);
            }
        }
        Ok(results)
    }
}

/// Ordering used to keep ledger states monotonic
pub(crate) fn state_rank(state: ShardState) -> u8 {
    match state {
        ShardState::Created => 0,
        ShardState::Dispatched => 1,
        ShardState::InProgress => 2,
        ShardState::Terminal(_) => 3,
    }
}
