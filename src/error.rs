//! # Error Types
//!
//! Structured error handling for the disbursement pipeline. Each failure kind
//! maps to one propagation rule:
//!
//! - [`ValidationError`] is returned synchronously from partitioning; no job exists.
//! - [`DispatchError`] is isolated to one shard and reported in the dispatch outcome.
//! - [`EntityWriteError`] is isolated to one entity and recorded in the shard's error children.
//! - [`ReconciliationError`] is returned to the orchestrating caller with the missing shards.

use crate::config::ConfigurationError;
use crate::messaging::QueueError;
use crate::models::{EntityKey, ShardId};
use crate::state_machine::StateTransitionError;
use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Malformed or empty input detected before any job is created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Disbursement batch is empty")]
    EmptyBatch,

    #[error("Row {row}: invalid amount '{value}': {reason}")]
    InvalidAmount {
        row: usize,
        value: String,
        reason: String,
    },

    #[error("Row {row}: recipient identifier is empty")]
    EmptyRecipient { row: usize },

    #[error("Row {row}: batch total exceeds the i64 range")]
    TotalOverflow { row: usize },

    #[error("Invalid chunk size {requested}: must be between 1 and {max}")]
    InvalidChunkSize { requested: usize, max: usize },

    #[error("Kind must not be empty")]
    EmptyKind,

    #[error("Key generator returned {actual} keys for {expected} entities")]
    KeyCountMismatch { expected: usize, actual: usize },

    #[error("Unknown payload type discriminator: {0}")]
    UnknownPayloadType(u8),

    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

impl ValidationError {
    pub fn invalid_amount(row: usize, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            row,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Queue submission failed for a single shard
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("Submission of shard {shard_id} failed: {reason}")]
    SubmissionFailed { shard_id: ShardId, reason: String },

    #[error("Submission of shard {shard_id} exceeded the {deadline_ms}ms deadline")]
    DeadlineExceeded { shard_id: ShardId, deadline_ms: u64 },

    #[error("Shard {shard_id} is not part of job {job_id}")]
    UnknownShard { shard_id: ShardId, job_id: String },
}

impl DispatchError {
    pub fn shard_id(&self) -> &ShardId {
        match self {
            Self::SubmissionFailed { shard_id, .. }
            | Self::DeadlineExceeded { shard_id, .. }
            | Self::UnknownShard { shard_id, .. } => shard_id,
        }
    }
}

/// A single entity failed to write within a shard
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Write of entity {key} in shard {shard_id} failed: {reason}")]
pub struct EntityWriteError {
    pub shard_id: ShardId,
    pub key: EntityKey,
    pub reason: String,
}

/// Dispatched shards never reached a terminal state within the bounded wait
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    #[error("Job {job_id}: {} of {expected} shards not terminal after {waited_ms}ms: {missing:?}", missing.len())]
    IncompleteShards {
        job_id: String,
        expected: usize,
        missing: Vec<ShardId>,
        waited_ms: u64,
    },

    #[error("Job {job_id}: no shards were dispatched")]
    NothingToReconcile { job_id: String },

    #[error("Job {job_id}: disbursed total exceeds the i64 range at shard {shard_id}")]
    TotalOverflow { job_id: String, shard_id: ShardId },
}

impl ReconciliationError {
    /// Shard ids the caller may choose to resubmit
    pub fn missing_shards(&self) -> &[ShardId] {
        match self {
            Self::IncompleteShards { missing, .. } => missing,
            Self::NothingToReconcile { .. } | Self::TotalOverflow { .. } => &[],
        }
    }
}

/// Crate-wide error
#[derive(Debug, Error)]
pub enum DisburseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Job {job_id}: no shard was acknowledged, {} submissions failed", errors.len())]
    NothingDispatched {
        job_id: String,
        errors: Vec<DispatchError>,
    },

    #[error("Entity write error: {0}")]
    EntityWrite(#[from] EntityWriteError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DisburseError {
    fn from(error: serde_json::Error) -> Self {
        DisburseError::Serialization(error.to_string())
    }
}

impl DisburseError {
    /// Shards the caller may resubmit after a failed run
    pub fn failed_shard_ids(&self) -> Vec<ShardId> {
        match self {
            Self::NothingDispatched { errors, .. } => {
                errors.iter().map(|e| e.shard_id().clone()).collect()
            }
            Self::Dispatch(error) => vec![error.shard_id().clone()],
            Self::Reconciliation(error) => error.missing_shards().to_vec(),
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DisburseError>;
