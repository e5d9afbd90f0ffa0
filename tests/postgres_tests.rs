//! End-to-end runs against PostgreSQL with the pgmq extension.
//!
//! Skipped unless `DATABASE_URL` is set.

#![cfg(feature = "postgres")]

mod common;

use common::*;
use disburse_core::keys::UuidKeyGenerator;
use disburse_core::models::{KeyedEntity, PayloadType, Recon};
use disburse_core::orchestration::{Collaborators, DisbursementPipeline};
use disburse_core::store::{EntityStore, ShardLedger};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(PgPool::connect(&url).await.expect("DATABASE_URL should be reachable"))
}

fn queue_name() -> String {
    format!("disburse_test_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_pgmq_dispatch_and_worker_reconcile() {
    let Some(pool) = pool().await else {
        return;
    };
    let (collaborators, queue) =
        Collaborators::postgres(pool, &queue_name(), Arc::new(UuidKeyGenerator))
            .await
            .unwrap();
    let pipeline = DisbursementPipeline::new(test_config(), collaborators);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(pipeline.runner().run_pgmq(
        queue,
        30,
        Duration::from_millis(20),
        shutdown_rx,
    ));

    let request = pipeline.plan(&rows(1200, 100), KIND, PayloadType::Pair).unwrap();
    let outcome = pipeline.dispatch(&request).await;
    assert!(outcome.is_complete());

    let report = pipeline.await_reconciliation(&outcome).await.unwrap();
    shutdown_tx.send(true).unwrap();
    let stats = runner.await.unwrap();

    assert_eq!(
        report.recon,
        Recon {
            total_disburse: 120_000,
            total_disbursees: 1200,
        }
    );
    assert_eq!(stats.shards_completed, 3);
}

#[tokio::test]
async fn test_pg_ledger_keeps_first_terminal_result() {
    let Some(pool) = pool().await else {
        return;
    };
    let (collaborators, _queue) =
        Collaborators::postgres(pool, &queue_name(), Arc::new(UuidKeyGenerator))
            .await
            .unwrap();

    let shard_id = format!("pg-{}-shard-00000", uuid::Uuid::new_v4().simple());
    let first = shard_result(&shard_id, 100, &[], 10);
    let second = shard_result(&shard_id, 100, &[("late", 60)], 10);

    let recorded = collaborators.ledger.record_terminal(first.clone()).await.unwrap();
    let replayed = collaborators.ledger.record_terminal(second).await.unwrap();

    assert_eq!(recorded, first);
    assert_eq!(replayed, first);
    assert_eq!(
        collaborators.ledger.terminal_result(&first.shard_id).await.unwrap(),
        Some(first)
    );
}

#[tokio::test]
async fn test_pg_store_upsert_overwrites() {
    let Some(pool) = pool().await else {
        return;
    };
    let (collaborators, _queue) =
        Collaborators::postgres(pool, &queue_name(), Arc::new(UuidKeyGenerator))
            .await
            .unwrap();
    let pipeline = DisbursementPipeline::new(test_config(), collaborators.clone());

    let request = pipeline.plan(&rows(3, 5), KIND, PayloadType::Voucher).unwrap();
    let shard = pipeline.dispatcher().shards_for(&request).remove(0);
    let entities: Vec<KeyedEntity> = shard.children().iter().map(KeyedEntity::from).collect();

    let first = collaborators.store.write_many(&entities).await.unwrap();
    let second = collaborators.store.write_many(&entities).await.unwrap();

    assert!(first.iter().chain(&second).all(|outcome| outcome.is_written()));
}
