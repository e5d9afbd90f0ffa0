#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Disburse Core
//!
//! Sharded bulk disbursement: a large batch of transfer instructions is split
//! into bounded chunks, each chunk executes as an independent shard on a task
//! queue, and the terminal shard reports are reconciled into one job-level
//! summary.
//!
//! ## Overview
//!
//! A job never fails as a whole. Entities that fail to write are recorded on
//! their shard and surface as retry candidates; shards that never finish
//! surface as missing ids. Outstanding work is always explicit, and no
//! completed write is rolled back.
//!
//! ## Module Organization
//!
//! - [`models`] - Rows, entities, process requests, shards and the `Recon` summary
//! - [`state_machine`] - Shard lifecycle states and transitions
//! - [`orchestration`] - Partitioner, dispatcher, shard worker and reconciler
//! - [`messaging`] - Task queue contract, in-memory and pgmq implementations
//! - [`store`] - Entity store and shard ledger contracts and implementations
//! - [`keys`] - Job, entity and shard identifiers
//! - [`ingest`] - Reading rows from files
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use disburse_core::config::ConfigManager;
//! use disburse_core::models::{DisburseRow, PayloadType};
//! use disburse_core::orchestration::{run_in_process, Collaborators};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let rows = vec![DisburseRow::new("100", "wallet-1"), DisburseRow::new("250", "wallet-2")];
//!
//! let summary = run_in_process(
//!     config,
//!     Collaborators::in_memory("disbursement_shards"),
//!     &rows,
//!     "Payout",
//!     PayloadType::WalletData,
//! )
//! .await?;
//! println!("{}", serde_json::to_string(&summary.report.recon)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, DisburseConfig};
pub use error::{
    DisburseError, DispatchError, EntityWriteError, ReconciliationError, Result, ValidationError,
};
pub use keys::{KeyGenerator, SequentialKeyGenerator, UuidKeyGenerator};
pub use models::{DisburseRow, PayloadType, ProcessRequest, Recon, Shard, ShardId, ShardResult};
pub use orchestration::{
    reconcile, Collaborators, DispatchOutcome, Dispatcher, Partitioner, ReconReport, Reconciler,
    ShardWorker,
};
