//! Builders for rows, configuration and running pipelines.

use chrono::Utc;
use disburse_core::config::{ConfigManager, DisburseConfig};
use disburse_core::messaging::TaskDeliveries;
use disburse_core::models::{DisburseRow, EntityKey, ShardId, ShardResult};
use disburse_core::orchestration::{DisbursementPipeline, RunnerStats};
use disburse_core::state_machine::TerminalOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const KIND: &str = "Payout";

/// `count` rows of `amount` minor units to distinct recipients
pub fn rows(count: usize, amount: i64) -> Vec<DisburseRow> {
    (0..count)
        .map(|i| DisburseRow::new(amount.to_string(), format!("wallet-{i:05}")))
        .collect()
}

/// Test-environment configuration with short waits
pub fn test_config() -> Arc<ConfigManager> {
    let mut config = DisburseConfig::default();
    config.dispatch.submission_deadline_seconds = 1;
    config.reconciliation.wait_timeout_seconds = 10;
    config.reconciliation.poll_interval_ms = 10;
    config.worker.max_concurrent_shards = 4;
    ConfigManager::from_config(config, "test").expect("test configuration is valid")
}

pub fn shard_result(id: &str, amount: i64, failed: &[(&str, i64)], children: usize) -> ShardResult {
    let failed_amount: i64 = failed.iter().map(|(_, a)| a).sum();
    ShardResult {
        shard_id: ShardId::from(id),
        job_id: "job".to_string(),
        chunk_index: 0,
        amount,
        filled: amount - failed_amount,
        failed_amount,
        child_count: children,
        error_children: failed.iter().map(|(k, _)| EntityKey::new(KIND, *k)).collect(),
        outcome: TerminalOutcome::from_failures(failed.len()),
        completed_at: Utc::now(),
    }
}

/// A worker runner executing in the background
pub struct RunningWorkers {
    pub results: mpsc::UnboundedReceiver<ShardResult>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<RunnerStats>,
}

impl RunningWorkers {
    pub fn start(pipeline: &DisbursementPipeline, deliveries: TaskDeliveries) -> Self {
        let (results_tx, results) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.runner().run(deliveries, results_tx, shutdown_rx));
        Self {
            results,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) -> RunnerStats {
        let _ = self.shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("runner stops")
            .expect("runner does not panic")
    }
}
