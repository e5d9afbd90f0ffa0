//! In-process store and ledger over dashmap.

use super::{
    ensure_within_write_limit, state_rank, EntityStore, ShardLedger, StoreResult, WriteOutcome,
};
use crate::models::{EntityKey, EntityPayload, KeyedEntity, ShardId, ShardResult};
use crate::state_machine::ShardState;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keyed entity store with overwrite semantics
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    entities: DashMap<EntityKey, EntityPayload>,
    write_calls: AtomicUsize,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Option<EntityPayload> {
        self.entities.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of `write_many` calls served
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn write_many(&self, entities: &[KeyedEntity]) -> StoreResult<Vec<WriteOutcome>> {
        ensure_within_write_limit(entities.len())?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        Ok(entities
            .iter()
            .map(|entity| {
                self.entities.insert(entity.key.clone(), entity.payload.clone());
                WriteOutcome::written(entity.key.clone())
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShardLedger {
    states: DashMap<ShardId, ShardState>,
    terminal: DashMap<ShardId, ShardResult>,
}

impl InMemoryShardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal.len()
    }
}

#[async_trait]
impl ShardLedger for InMemoryShardLedger {
    async fn mark_state(&self, shard_id: &ShardId, state: ShardState) -> StoreResult<()> {
        match self.states.entry(shard_id.clone()) {
            Entry::Occupied(mut entry) => {
                if state_rank(state) > state_rank(*entry.get()) {
                    entry.insert(state);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(state);
            }
        }
        Ok(())
    }

    async fn state(&self, shard_id: &ShardId) -> StoreResult<Option<ShardState>> {
        Ok(self.states.get(shard_id).map(|entry| *entry.value()))
    }

    async fn terminal_result(&self, shard_id: &ShardId) -> StoreResult<Option<ShardResult>> {
        Ok(self.terminal.get(shard_id).map(|entry| entry.value().clone()))
    }

    async fn record_terminal(&self, result: ShardResult) -> StoreResult<ShardResult> {
        let shard_id = result.shard_id.clone();
        let stored = self
            .terminal
            .entry(shard_id.clone())
            .or_insert(result)
            .value()
            .clone();
        self.states
            .insert(shard_id, ShardState::Terminal(stored.outcome));
        Ok(stored)
    }
}
