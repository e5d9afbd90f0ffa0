//! # Disbursement Pipeline
//!
//! Wires the partitioner, dispatcher, shard worker and reconciliation
//! collector from one [`ConfigManager`] and one set of [`Collaborators`].
//!
//! ```text
//! rows -> plan -> ProcessRequest -> dispatch -> tasks -> workers -> ShardResults -> reconcile
//! ```

use crate::config::ConfigManager;
use crate::error::{DisburseError, Result, ValidationError};
use crate::models::{DisburseRow, PayloadType, ProcessRequest, ShardId, ShardResult};
use crate::orchestration::{
    Collaborators, DispatchOutcome, Dispatcher, DispatcherConfig, InMemoryBackends, Partitioner,
    PartitionerConfig, ReconReport, ReconciliationCollector, Reconciler, RunnerStats, ShardWorker,
    ShardWorkerConfig, WorkerRunner,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument};

pub struct DisbursementPipeline {
    config: Arc<ConfigManager>,
    collaborators: Collaborators,
    partitioner: Partitioner,
    dispatcher: Dispatcher,
    worker: Arc<ShardWorker>,
    collector: ReconciliationCollector,
}

impl DisbursementPipeline {
    pub fn new(config: Arc<ConfigManager>, collaborators: Collaborators) -> Self {
        let partitioner = Partitioner::with_config(
            collaborators.keys.clone(),
            PartitionerConfig::from_config_manager(&config),
        );
        let dispatcher = Dispatcher::with_config(
            collaborators.queue.clone(),
            collaborators.ledger.clone(),
            collaborators.keys.clone(),
            DispatcherConfig::from_config_manager(&config),
        );
        let worker = Arc::new(ShardWorker::with_config(
            collaborators.store.clone(),
            collaborators.ledger.clone(),
            ShardWorkerConfig::from_config_manager(&config),
        ));
        let collector = ReconciliationCollector::from_config_manager(&config);

        Self {
            config,
            collaborators,
            partitioner,
            dispatcher,
            worker,
            collector,
        }
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn worker(&self) -> Arc<ShardWorker> {
        self.worker.clone()
    }

    pub fn collector(&self) -> ReconciliationCollector {
        self.collector
    }

    /// Runner executing this pipeline's worker at the configured concurrency
    pub fn runner(&self) -> WorkerRunner {
        WorkerRunner::new(
            self.worker.clone(),
            self.config.config().worker.max_concurrent_shards,
        )
    }

    /// Validate and partition rows under the environment's kind
    pub fn plan(
        &self,
        rows: &[DisburseRow],
        kind: &str,
        payload_type: PayloadType,
    ) -> std::result::Result<ProcessRequest, ValidationError> {
        let resolved = self.config.resolve_kind(kind.trim());
        self.partitioner.partition(rows, &resolved, payload_type)
    }

    pub async fn dispatch(&self, request: &ProcessRequest) -> DispatchOutcome {
        self.dispatcher.dispatch(request).await
    }

    pub async fn resubmit(&self, request: &ProcessRequest, shard_ids: &[ShardId]) -> DispatchOutcome {
        self.dispatcher.resubmit(request, shard_ids).await
    }

    /// Reconciler expecting every shard `outcome` acknowledged
    pub fn reconciler_for(&self, outcome: &DispatchOutcome) -> Reconciler {
        Reconciler::new(outcome.job_id.clone(), outcome.shard_ids())
    }

    /// Wait on the ledger for the dispatched shards, then reconcile
    ///
    /// Fails with [`DisburseError::NothingDispatched`] when every submission
    /// failed, carrying the errors for a later resubmit.
    pub async fn await_reconciliation(&self, outcome: &DispatchOutcome) -> Result<ReconReport> {
        ensure_dispatched(outcome)?;
        let report = self
            .collector
            .collect_from_ledger(self.reconciler_for(outcome), self.collaborators.ledger.as_ref())
            .await??;
        self.dispatcher.release(&outcome.shard_ids());
        Ok(report)
    }
}

fn ensure_dispatched(outcome: &DispatchOutcome) -> Result<()> {
    if outcome.shards.is_empty() && !outcome.errors.is_empty() {
        return Err(DisburseError::NothingDispatched {
            job_id: outcome.job_id.clone(),
            errors: outcome.errors.clone(),
        });
    }
    Ok(())
}

/// Everything a caller learns about one in-process run
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub kind: String,
    pub total_entities: usize,
    pub total_amount: i64,
    pub dispatch: DispatchOutcome,
    pub report: ReconReport,
    #[serde(skip)]
    pub runner: RunnerStats,
}

/// Plan, dispatch, execute and reconcile a job within this process
#[instrument(skip(config, backends, rows), fields(rows = rows.len(), kind = %kind))]
pub async fn run_in_process(
    config: Arc<ConfigManager>,
    backends: InMemoryBackends,
    rows: &[DisburseRow],
    kind: &str,
    payload_type: PayloadType,
) -> Result<JobSummary> {
    let InMemoryBackends {
        collaborators,
        deliveries,
        ..
    } = backends;
    let pipeline = DisbursementPipeline::new(config, collaborators);
    let request = pipeline.plan(rows, kind, payload_type)?;

    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<ShardResult>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(pipeline.runner().run(deliveries, results_tx, shutdown_rx));

    let dispatch = pipeline.dispatch(&request).await;
    let reconciled = match ensure_dispatched(&dispatch) {
        Ok(()) => pipeline
            .collector()
            .collect_from_channel(pipeline.reconciler_for(&dispatch), &mut results_rx)
            .await
            .map_err(DisburseError::from),
        Err(e) => Err(e),
    };

    // A send error only means the runner has already stopped
    let _ = shutdown_tx.send(true);
    let runner = runner.await.unwrap_or_default();
    pipeline.dispatcher().release(&dispatch.shard_ids());
    let report = reconciled?;

    info!(
        job_id = %request.job_id(),
        total_disburse = report.recon.total_disburse,
        total_disbursees = report.recon.total_disbursees,
        failed_dispatches = dispatch.failed_shard_ids.len(),
        "In-process run finished"
    );

    Ok(JobSummary {
        job_id: request.job_id().to_string(),
        kind: request.kind().to_string(),
        total_entities: request.total_entities(),
        total_amount: request.total_amount(),
        dispatch,
        report,
        runner,
    })
}
