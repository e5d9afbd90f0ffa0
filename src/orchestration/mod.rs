//! # Orchestration
//!
//! The four stages of a bulk disbursement job.
//!
//! ## Core Components
//!
//! - **Partitioner**: validates rows, mints entity keys and splits them into ordered chunks of at most 500
//! - **Dispatcher**: turns each chunk into a shard and submits it as an independent queue task
//! - **ShardWorker**: writes a shard's children in batches, isolating per-entity failures
//! - **Reconciler**: aggregates terminal shard reports into the job's `Recon`
//!
//! Supporting pieces:
//!
//! - **WorkerRunner**: executes delivered tasks with bounded concurrency
//! - **ReconciliationCollector**: bounded wait for terminal reports over a channel or the ledger
//! - **DisbursementPipeline**: wires the stages from configuration and collaborators

pub mod collaborators;
pub mod dispatcher;
pub mod partitioner;
pub mod pipeline;
pub mod reconciler;
pub mod shard_worker;
pub mod worker_runner;

pub use collaborators::{Collaborators, InMemoryBackends};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig, ShardHandle};
pub use partitioner::{Partitioner, PartitionerConfig};
pub use pipeline::{run_in_process, DisbursementPipeline, JobSummary};
pub use reconciler::{reconcile, ReconReport, ReconciliationCollector, Reconciler, RecordOutcome};
pub use shard_worker::{ShardWorker, ShardWorkerConfig};
pub use worker_runner::{RunnerStats, WorkerRunner};
