//! # Shard Task Messages
//!
//! The payload carried by one queue task: exactly one shard's identifier and
//! its entities, enough for a worker to rebuild the shard without a lookup.

use crate::error::ValidationError;
use crate::models::{DisbursementEntity, PayloadType, Shard, ShardId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message for shard execution via queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTask {
    pub shard_id: ShardId,
    pub job_id: String,
    pub chunk_index: usize,
    /// Store grouping the entities are written under
    pub kind: String,
    pub payload_type: PayloadType,
    pub entities: Vec<DisbursementEntity>,
    pub metadata: ShardTaskMetadata,
}

/// Metadata for shard task messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTaskMetadata {
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Submission attempt, 1 for the first dispatch
    pub attempt: u32,
    /// Message correlation ID for tracking
    pub correlation_id: String,
}

impl Default for ShardTaskMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            attempt: 1,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

impl ShardTask {
    pub fn from_shard(shard: &Shard) -> Self {
        Self {
            shard_id: shard.id().clone(),
            job_id: shard.job_id().to_string(),
            chunk_index: shard.chunk_index(),
            kind: shard.kind().to_string(),
            payload_type: shard.payload_type(),
            entities: shard.children().to_vec(),
            metadata: ShardTaskMetadata::default(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.metadata.attempt = attempt;
        self
    }

    /// Rebuild the dispatched shard on the worker side
    pub fn into_shard(self) -> Result<Shard, ValidationError> {
        Shard::dispatched(
            self.shard_id,
            self.job_id,
            self.chunk_index,
            self.kind,
            self.payload_type,
            self.entities,
        )
    }

    /// Convert to JSON for queue storage
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Create from JSON from queue
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }
}

/// Queue acknowledgment of one submitted task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub queue_name: String,
    pub message_id: i64,
    pub shard_id: ShardId,
    pub submitted_at: DateTime<Utc>,
}
