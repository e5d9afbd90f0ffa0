//! # Partitioner
//!
//! Turns validated disbursement rows into a [`ProcessRequest`]: one minted
//! key per row and order-preserving chunks no larger than the store's write
//! limit.
//!
//! Validation happens before any key is generated, so a rejected batch never
//! allocates identifiers or creates a job.

use crate::config::ConfigManager;
use crate::constants::{operations, DEFAULT_MAX_CHUNK_SIZE, MAX_WRITE_BATCH_SIZE};
use crate::error::ValidationError;
use crate::keys::KeyGenerator;
use crate::logging::log_job_operation;
use crate::models::{
    checked_total, DisburseRow, DisbursementEntity, EntityChunk, EntityPayload, PayloadType,
    ProcessRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// Configuration for partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionerConfig {
    /// Upper bound on rows per chunk, between 1 and 500
    pub max_chunk_size: usize,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl PartitionerConfig {
    pub fn from_config_manager(config_manager: &ConfigManager) -> Self {
        Self {
            max_chunk_size: config_manager.config().partition.max_chunk_size,
        }
    }
}

pub struct Partitioner {
    keys: Arc<dyn KeyGenerator>,
    config: PartitionerConfig,
}

impl Partitioner {
    pub fn new(keys: Arc<dyn KeyGenerator>) -> Self {
        Self::with_config(keys, PartitionerConfig::default())
    }

    pub fn with_config(keys: Arc<dyn KeyGenerator>, config: PartitionerConfig) -> Self {
        Self { keys, config }
    }

    pub fn config(&self) -> PartitionerConfig {
        self.config
    }

    /// Partition `rows` using the configured chunk size
    pub fn partition(
        &self,
        rows: &[DisburseRow],
        kind: &str,
        payload_type: PayloadType,
    ) -> Result<ProcessRequest, ValidationError> {
        self.partition_with_chunk_size(rows, kind, payload_type, self.config.max_chunk_size)
    }

    /// Validate `rows`, mint one key per row and split them into ordered chunks
    ///
    /// Every chunk but the last holds exactly `max_chunk_size` rows; the last
    /// holds the remainder. Concatenating the chunks yields the input order.
    #[instrument(skip(self, rows), fields(rows = rows.len(), kind = %kind, payload_type = %payload_type))]
    pub fn partition_with_chunk_size(
        &self,
        rows: &[DisburseRow],
        kind: &str,
        payload_type: PayloadType,
        max_chunk_size: usize,
    ) -> Result<ProcessRequest, ValidationError> {
        let start_time = Instant::now();

        if max_chunk_size == 0 || max_chunk_size > MAX_WRITE_BATCH_SIZE {
            return Err(ValidationError::InvalidChunkSize {
                requested: max_chunk_size,
                max: MAX_WRITE_BATCH_SIZE,
            });
        }
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(ValidationError::EmptyKind);
        }
        if rows.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        let validated = rows
            .iter()
            .enumerate()
            .map(|(index, row)| Ok((row.recipient(index)?, row.parse_amount(index)?)))
            .collect::<Result<Vec<_>, ValidationError>>()?;
        checked_total(validated.iter().map(|(_, amount)| *amount))
            .map_err(|row| ValidationError::TotalOverflow { row })?;

        let keys = self.keys.entity_keys(kind, validated.len());
        if keys.len() != validated.len() {
            return Err(ValidationError::KeyCountMismatch {
                expected: validated.len(),
                actual: keys.len(),
            });
        }

        let entities: Vec<DisbursementEntity> = validated
            .into_iter()
            .zip(keys)
            .map(|((recipient, amount), key)| DisbursementEntity {
                payload: EntityPayload::for_row(payload_type, &key.name, recipient, amount),
                recipient: recipient.to_string(),
                amount,
                key,
            })
            .collect();

        let chunks = entities
            .chunks(max_chunk_size)
            .map(|chunk| EntityChunk::try_new(chunk.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;

        let job_id = self.keys.job_id();
        let request = ProcessRequest::new(job_id, kind.to_string(), payload_type, chunks)?;

        debug!(
            job_id = %request.job_id(),
            chunks = request.entity_chunks().len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Rows partitioned"
        );
        log_job_operation(
            operations::PARTITION,
            request.job_id(),
            Some(request.kind()),
            "created",
            Some(&format!(
                "{} entities in {} chunks, total {}",
                request.total_entities(),
                request.entity_chunks().len(),
                request.total_amount()
            )),
        );

        Ok(request)
    }
}
