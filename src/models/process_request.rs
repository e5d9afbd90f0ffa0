//! # Process Request
//!
//! A bulk disbursement job after partitioning. Built once by the partitioner
//! and frozen: fields are private and only read accessors are exposed.

use crate::constants::MAX_WRITE_BATCH_SIZE;
use crate::error::ValidationError;
use crate::models::entity::{checked_total, DisbursementEntity, EntityKey};
use crate::models::payload::PayloadType;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ordered batch of entities that fits in one store write (at most 500)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityChunk {
    entities: Vec<DisbursementEntity>,
    total_amount: i64,
}

impl EntityChunk {
    pub fn try_new(entities: Vec<DisbursementEntity>) -> Result<Self, ValidationError> {
        if entities.is_empty() || entities.len() > MAX_WRITE_BATCH_SIZE {
            return Err(ValidationError::InvalidChunkSize {
                requested: entities.len(),
                max: MAX_WRITE_BATCH_SIZE,
            });
        }
        let total_amount = checked_total(entities.iter().map(|e| e.amount))
            .map_err(|row| ValidationError::TotalOverflow { row })?;
        Ok(Self {
            entities,
            total_amount,
        })
    }

    pub fn entities(&self) -> &[DisbursementEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Sum of the chunk's row amounts in minor units
    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRequest {
    job_id: String,
    kind: String,
    payload_type: PayloadType,
    entity_keys: Vec<EntityKey>,
    entity_chunks: Vec<EntityChunk>,
    total_amount: i64,
    created_at: DateTime<Utc>,
}

impl ProcessRequest {
    pub(crate) fn new(
        job_id: String,
        kind: String,
        payload_type: PayloadType,
        entity_chunks: Vec<EntityChunk>,
    ) -> Result<Self, ValidationError> {
        let total_amount = checked_total(entity_chunks.iter().map(EntityChunk::total_amount))
            .map_err(|chunk| ValidationError::TotalOverflow {
                row: entity_chunks[..chunk].iter().map(EntityChunk::len).sum(),
            })?;
        let entity_keys = entity_chunks
            .iter()
            .flat_map(|chunk| chunk.entities().iter().map(|e| e.key.clone()))
            .collect();

        Ok(Self {
            job_id,
            kind,
            payload_type,
            entity_keys,
            entity_chunks,
            total_amount,
            created_at: Utc::now(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Store grouping the entities are written under
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// One key per entity, in chunk order
    pub fn entity_keys(&self) -> &[EntityKey] {
        &self.entity_keys
    }

    pub fn entity_chunks(&self) -> &[EntityChunk] {
        &self.entity_chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&EntityChunk> {
        self.entity_chunks.get(index)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total_entities(&self) -> usize {
        self.entity_chunks.iter().map(EntityChunk::len).sum()
    }

    pub fn total_amount(&self) -> i64 {
        self.total_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payload::EntityPayload;

    fn entity(index: usize, amount: i64) -> DisbursementEntity {
        DisbursementEntity {
            key: EntityKey::new("Payout", format!("e-{index}")),
            recipient: format!("r-{index}"),
            amount,
            payload: EntityPayload::for_row(PayloadType::Pair, "e", "r", amount),
        }
    }

    #[test]
    fn test_chunk_rejects_oversized_and_empty() {
        let oversized: Vec<_> = (0..=MAX_WRITE_BATCH_SIZE).map(|i| entity(i, 1)).collect();
        assert!(EntityChunk::try_new(oversized).is_err());
        assert!(EntityChunk::try_new(Vec::new()).is_err());
    }

    #[test]
    fn test_request_keys_follow_chunk_order() {
        let first = EntityChunk::try_new(vec![entity(0, 10), entity(1, 20)]).unwrap();
        let second = EntityChunk::try_new(vec![entity(2, 30)]).unwrap();
        let request = ProcessRequest::new(
            "job".to_string(),
            "Payout".to_string(),
            PayloadType::Pair,
            vec![first, second],
        )
        .unwrap();

        let names: Vec<_> = request.entity_keys().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["e-0", "e-1", "e-2"]);
        assert_eq!(request.total_entities(), 3);
        assert_eq!(request.total_amount(), 60);
        assert_eq!(request.chunk(0).map(EntityChunk::total_amount), Some(30));
    }

    #[test]
    fn test_totals_that_overflow_are_rejected() {
        assert_eq!(
            EntityChunk::try_new(vec![entity(0, i64::MAX), entity(1, 1)]),
            Err(ValidationError::TotalOverflow { row: 1 })
        );

        let first = EntityChunk::try_new(vec![entity(0, i64::MAX - 1), entity(1, 1)]).unwrap();
        let second = EntityChunk::try_new(vec![entity(2, 1)]).unwrap();
        let request = ProcessRequest::new(
            "job".to_string(),
            "Payout".to_string(),
            PayloadType::Pair,
            vec![first, second],
        );
        assert_eq!(request, Err(ValidationError::TotalOverflow { row: 2 }));
    }
}
