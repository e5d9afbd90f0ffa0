//! # Shard Worker
//!
//! Executes one shard: writes its children to the entity store in batches,
//! tracks `filled` and `error_children`, and records a terminal result in the
//! ledger.
//!
//! A failed entity write is isolated to that entity. Re-delivery of an
//! already terminal shard returns the recorded result without writing, and a
//! re-run of an interrupted shard rewrites the same frozen keys, so the store
//! never holds duplicates.

use crate::config::{ConfigManager, WorkerConfig};
use crate::constants::{operations, MAX_WRITE_BATCH_SIZE};
use crate::error::{EntityWriteError, Result};
use crate::logging::log_shard_operation;
use crate::messaging::ShardTask;
use crate::models::{EntityKey, KeyedEntity, Shard, ShardResult};
use crate::state_machine::{ShardEvent, ShardState, StateTransitionError};
use crate::store::{EntityStore, ShardLedger, StoreResult, WriteOutcome};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Batching of store writes within one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardWorkerConfig {
    pub write_batch_size: usize,
    pub write_concurrency: usize,
}

impl Default for ShardWorkerConfig {
    fn default() -> Self {
        Self {
            write_batch_size: MAX_WRITE_BATCH_SIZE,
            write_concurrency: 1,
        }
    }
}

impl From<&WorkerConfig> for ShardWorkerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            write_batch_size: config.write_batch_size,
            write_concurrency: config.write_concurrency,
        }
    }
}

impl ShardWorkerConfig {
    pub fn from_config_manager(config_manager: &ConfigManager) -> Self {
        Self::from(&config_manager.config().worker)
    }
}

pub struct ShardWorker {
    store: Arc<dyn EntityStore>,
    ledger: Arc<dyn ShardLedger>,
    config: ShardWorkerConfig,
}

impl ShardWorker {
    pub fn new(store: Arc<dyn EntityStore>, ledger: Arc<dyn ShardLedger>) -> Self {
        Self::with_config(store, ledger, ShardWorkerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EntityStore>,
        ledger: Arc<dyn ShardLedger>,
        config: ShardWorkerConfig,
    ) -> Self {
        let config = ShardWorkerConfig {
            write_batch_size: config.write_batch_size.clamp(1, MAX_WRITE_BATCH_SIZE),
            write_concurrency: config.write_concurrency.max(1),
        };
        Self {
            store,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> ShardWorkerConfig {
        self.config
    }

    /// Process a task as delivered by the queue
    pub async fn handle_task(&self, task: ShardTask) -> Result<ShardResult> {
        debug!(
            shard_id = %task.shard_id,
            attempt = task.metadata.attempt,
            correlation_id = %task.metadata.correlation_id,
            "Shard task received"
        );
        self.process_shard(task.into_shard()?).await
    }

    /// Drive a dispatched shard to a terminal state
    ///
    /// Returns the ledger's terminal result, which is the first result ever
    /// recorded for this shard.
    #[instrument(skip(self, shard), fields(shard_id = %shard.id(), job_id = %shard.job_id(), children = shard.children().len()))]
    pub async fn process_shard(&self, mut shard: Shard) -> Result<ShardResult> {
        let start_time = Instant::now();

        if let Some(existing) = self.ledger.terminal_result(shard.id()).await? {
            log_shard_operation(
                operations::PROCESS_SHARD,
                shard.job_id(),
                shard.id().as_str(),
                "already_terminal",
                Some(&existing.outcome.to_string()),
            );
            return Ok(existing);
        }

        shard.apply(ShardEvent::Start)?;
        self.ledger.mark_state(shard.id(), ShardState::InProgress).await?;

        let batches: Vec<Vec<KeyedEntity>> = shard
            .children()
            .chunks(self.config.write_batch_size)
            .map(|chunk| chunk.iter().map(KeyedEntity::from).collect())
            .collect();
        let batch_count = batches.len();

        let written: Vec<(Vec<KeyedEntity>, StoreResult<Vec<WriteOutcome>>)> = stream::iter(batches)
            .map(|batch| async move {
                let outcome = self.store.write_many(&batch).await;
                (batch, outcome)
            })
            .buffered(self.config.write_concurrency)
            .collect()
            .await;

        let failures = self.settle(&mut shard, written)?;
        for failure in &failures {
            warn!(
                shard_id = %failure.shard_id,
                key = %failure.key,
                reason = %failure.reason,
                "Entity write failed"
            );
        }

        let failed_children = shard.error_children().len();
        let state = shard.apply(ShardEvent::Finish { failed_children })?;
        let result = shard.result().ok_or(StateTransitionError::InvalidTransition {
            from: state,
            event: "finish",
        })?;

        let recorded = self.ledger.record_terminal(result).await?;

        log_shard_operation(
            operations::PROCESS_SHARD,
            shard.job_id(),
            shard.id().as_str(),
            &recorded.outcome.to_string(),
            Some(&format!(
                "filled {} of {}, {} failed children, {} batches in {}ms",
                recorded.filled,
                recorded.amount,
                recorded.error_children.len(),
                batch_count,
                start_time.elapsed().as_millis()
            )),
        );

        Ok(recorded)
    }

    /// Fold batch outcomes into the shard in child order
    ///
    /// A key the store did not report on counts as failed, as does every key
    /// of a batch whose call failed outright.
    fn settle(
        &self,
        shard: &mut Shard,
        written: Vec<(Vec<KeyedEntity>, StoreResult<Vec<WriteOutcome>>)>,
    ) -> Result<Vec<EntityWriteError>> {
        let amounts: HashMap<EntityKey, i64> = shard
            .children()
            .iter()
            .map(|child| (child.key.clone(), child.amount))
            .collect();
        let mut failures = Vec::new();

        for (batch, outcome) in written {
            let reported: HashMap<EntityKey, Option<String>> = match outcome {
                Ok(outcomes) => outcomes.into_iter().map(|o| (o.key, o.error)).collect(),
                Err(e) => batch
                    .iter()
                    .map(|entity| (entity.key.clone(), Some(e.to_string())))
                    .collect(),
            };

            for entity in batch {
                let amount = amounts.get(&entity.key).copied().unwrap_or_default();
                match reported.get(&entity.key) {
                    Some(None) => shard.record_written(amount)?,
                    Some(Some(reason)) => {
                        failures.push(EntityWriteError {
                            shard_id: shard.id().clone(),
                            key: entity.key.clone(),
                            reason: reason.clone(),
                        });
                        shard.record_failed(entity.key, amount)?;
                    }
                    None => {
                        failures.push(EntityWriteError {
                            shard_id: shard.id().clone(),
                            key: entity.key.clone(),
                            reason: "no outcome reported by store".to_string(),
                        });
                        shard.record_failed(entity.key, amount)?;
                    }
                }
            }
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisbursementEntity, EntityPayload, PayloadType, ShardId};
    use crate::state_machine::TerminalOutcome;
    use crate::store::{InMemoryEntityStore, InMemoryShardLedger};

    fn shard(id: &str, amounts: &[i64]) -> Shard {
        let children = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| DisbursementEntity {
                key: EntityKey::new("Payout", format!("{id}-{i}")),
                recipient: format!("wallet-{i}"),
                amount: *amount,
                payload: EntityPayload::for_row(PayloadType::Pair, "e", "wallet", *amount),
            })
            .collect();
        Shard::dispatched(ShardId::from(id), "job", 0, "Payout", PayloadType::Pair, children).unwrap()
    }

    #[tokio::test]
    async fn test_writes_all_children_in_batches() {
        let store = Arc::new(InMemoryEntityStore::new());
        let ledger = Arc::new(InMemoryShardLedger::new());
        let worker = ShardWorker::with_config(
            store.clone(),
            ledger.clone(),
            ShardWorkerConfig {
                write_batch_size: 2,
                write_concurrency: 2,
            },
        );

        let result = worker.process_shard(shard("s-1", &[10, 20, 30, 40, 50])).await.unwrap();

        assert_eq!(result.outcome, TerminalOutcome::Success);
        assert_eq!(result.filled, 150);
        assert_eq!(result.amount, 150);
        assert!(result.error_children.is_empty());
        assert_eq!(store.len(), 5);
        assert_eq!(store.write_calls(), 3);
        assert_eq!(
            ledger.state(&ShardId::from("s-1")).await.unwrap(),
            Some(ShardState::Terminal(TerminalOutcome::Success))
        );
    }

    #[tokio::test]
    async fn test_terminal_shard_is_not_rewritten() {
        let store = Arc::new(InMemoryEntityStore::new());
        let worker = ShardWorker::new(store.clone(), Arc::new(InMemoryShardLedger::new()));

        let first = worker.process_shard(shard("s-1", &[10, 20])).await.unwrap();
        let second = worker.process_shard(shard("s-1", &[10, 20])).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_created_shard_cannot_start() {
        let worker = ShardWorker::new(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(InMemoryShardLedger::new()),
        );
        let created =
            Shard::new(ShardId::from("s-1"), "job", 0, "Payout", PayloadType::Pair, Vec::new()).unwrap();
        assert!(worker.process_shard(created).await.is_err());
    }

    #[tokio::test]
    async fn test_task_with_overflowing_total_is_rejected_before_writing() {
        let store = Arc::new(InMemoryEntityStore::new());
        let worker = ShardWorker::new(store.clone(), Arc::new(InMemoryShardLedger::new()));

        let mut task = ShardTask::from_shard(&shard("s-1", &[1, 1]));
        for entity in &mut task.entities {
            entity.amount = i64::MAX;
        }

        let err = worker.handle_task(task).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DisburseError::Validation(crate::error::ValidationError::TotalOverflow { row: 1 })
        ));
        assert_eq!(store.write_calls(), 0);
    }

    #[test]
    fn test_config_is_clamped_to_store_limit() {
        let worker = ShardWorker::with_config(
            Arc::new(InMemoryEntityStore::new()),
            Arc::new(InMemoryShardLedger::new()),
            ShardWorkerConfig {
                write_batch_size: 10_000,
                write_concurrency: 0,
            },
        );
        assert_eq!(worker.config().write_batch_size, 500);
        assert_eq!(worker.config().write_concurrency, 1);
    }
}
