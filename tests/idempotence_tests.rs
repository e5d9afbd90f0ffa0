//! At-least-once delivery, re-invocation and retried dispatch never
//! duplicate entities or double count a shard.

mod common;

use common::*;
use disburse_core::keys::SequentialKeyGenerator;
use disburse_core::messaging::{InMemoryTaskQueue, ShardTask};
use disburse_core::models::{KeyedEntity, PayloadType};
use disburse_core::orchestration::{
    run_in_process, Collaborators, DisbursementPipeline, InMemoryBackends, ShardWorker,
};
use disburse_core::store::{EntityStore, InMemoryEntityStore, InMemoryShardLedger};
use std::sync::Arc;

fn keys() -> Arc<SequentialKeyGenerator> {
    Arc::new(SequentialKeyGenerator::new("idem"))
}

#[tokio::test]
async fn test_duplicate_deliveries_reconcile_like_single_delivery() {
    let single = run_in_process(
        test_config(),
        InMemoryBackends::new("shards", keys()),
        &rows(1200, 100),
        KIND,
        PayloadType::Pair,
    )
    .await
    .unwrap();

    let (queue, deliveries) = InMemoryTaskQueue::new("shards");
    let backends = InMemoryBackends::with_queue(queue.with_deliveries_per_task(3), deliveries, keys());
    let store = backends.store.clone();
    let ledger = backends.ledger.clone();

    let tripled = run_in_process(test_config(), backends, &rows(1200, 100), KIND, PayloadType::Pair)
        .await
        .unwrap();

    assert_eq!(tripled.report.recon, single.report.recon);
    assert_eq!(store.len(), 1200);
    assert_eq!(ledger.terminal_count(), 3);
}

#[tokio::test]
async fn test_reprocessing_a_terminal_shard_issues_no_writes() {
    let backends = InMemoryBackends::new("shards", keys());
    let inner = backends.store.clone();
    let pipeline = DisbursementPipeline::new(test_config(), backends.collaborators);

    let request = pipeline.plan(&rows(40, 7), KIND, PayloadType::Voucher).unwrap();
    let shard = pipeline.dispatcher().shards_for(&request).remove(0);
    let task = ShardTask::from_shard(&shard);

    let worker = pipeline.worker();
    let first = worker.handle_task(task.clone()).await.unwrap();
    let calls = inner.write_calls();
    let second = worker.handle_task(task).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(inner.write_calls(), calls);
}

#[tokio::test]
async fn test_interrupted_shard_rerun_overwrites_instead_of_duplicating() {
    let store = Arc::new(InMemoryEntityStore::new());
    let ledger = Arc::new(InMemoryShardLedger::new());
    let backends = InMemoryBackends::new("shards", keys());
    let pipeline = DisbursementPipeline::new(test_config(), backends.collaborators);

    let request = pipeline.plan(&rows(20, 3), KIND, PayloadType::WalletData).unwrap();
    let shard = pipeline.dispatcher().shards_for(&request).remove(0);

    // A previous attempt wrote half the children and died before finishing
    let half: Vec<KeyedEntity> = shard.children()[..10].iter().map(KeyedEntity::from).collect();
    store.write_many(&half).await.unwrap();

    let worker = ShardWorker::new(store.clone(), ledger);
    let task = ShardTask::from_shard(&shard).with_attempt(2);
    let result = worker.handle_task(task).await.unwrap();

    assert_eq!(result.filled, 60);
    assert!(result.error_children.is_empty());
    assert_eq!(store.len(), 20);
}

#[tokio::test]
async fn test_whole_batch_failure_marks_every_child_of_the_batch() {
    let inner = Arc::new(InMemoryEntityStore::new());
    let poisoned = sequential_name("idem", 3);
    let collaborators = Collaborators::new(
        Arc::new(InMemoryTaskQueue::new("shards").0),
        Arc::new(SelectiveFailingStore::new(inner.clone()).poisoned(poisoned)),
        Arc::new(InMemoryShardLedger::new()),
        keys(),
    );

    let mut config = test_config().config().clone();
    config.worker.write_batch_size = 5;
    let config = disburse_core::config::ConfigManager::from_config(config, "test").unwrap();
    let pipeline = DisbursementPipeline::new(config, collaborators);

    let request = pipeline.plan(&rows(12, 10), KIND, PayloadType::Pair).unwrap();
    let shard = pipeline.dispatcher().shards_for(&request).remove(0);
    let result = pipeline.worker().handle_task(ShardTask::from_shard(&shard)).await.unwrap();

    // Rows 1..=5 share a batch with the poisoned row
    assert_eq!(result.error_children.len(), 5);
    assert_eq!(result.filled, 70);
    assert_eq!(result.failed_amount, 50);
    assert!(result.is_balanced());
    assert_eq!(inner.len(), 7);
}

#[tokio::test]
async fn test_retried_dispatch_does_not_resubmit_acknowledged_shards() {
    let backends = InMemoryBackends::new("shards", keys());
    let queue = backends.queue.clone();
    let pipeline = DisbursementPipeline::new(test_config(), backends.collaborators);

    let request = pipeline.plan(&rows(1200, 1), KIND, PayloadType::Pair).unwrap();
    let first = pipeline.dispatch(&request).await;
    let second = pipeline.dispatch(&request).await;

    assert_eq!(first.shard_ids(), second.shard_ids());
    assert_eq!(queue.submitted().len(), 3);
}
