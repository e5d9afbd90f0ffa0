//! # Shard
//!
//! An independently progressing unit of disbursement work. The dispatcher
//! synthesizes one shard per chunk; afterwards only the worker that owns it
//! mutates `filled`, `error_children` and the state, through crate-private
//! methods. A terminal shard is frozen into a [`ShardResult`].

use crate::error::ValidationError;
use crate::models::entity::{checked_total, DisbursementEntity, EntityKey};
use crate::models::payload::PayloadType;
use crate::models::process_request::EntityChunk;
use crate::state_machine::{
    determine_target_state, ShardEvent, ShardState, StateTransitionError, TerminalOutcome,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Unique shard identifier, also the dispatch idempotency key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    id: ShardId,
    job_id: String,
    chunk_index: usize,
    kind: String,
    payload_type: PayloadType,
    amount: i64,
    filled: i64,
    failed_amount: i64,
    children: Vec<DisbursementEntity>,
    error_children: Vec<EntityKey>,
    settled: usize,
    state: ShardState,
}

impl Shard {
    /// Create a shard in the `Created` state; `amount` is derived from the children
    ///
    /// Children must carry non-negative amounts whose sum fits in i64.
    pub fn new(
        id: ShardId,
        job_id: impl Into<String>,
        chunk_index: usize,
        kind: impl Into<String>,
        payload_type: PayloadType,
        children: Vec<DisbursementEntity>,
    ) -> Result<Self, ValidationError> {
        if let Some(row) = children.iter().position(|c| c.amount < 0) {
            return Err(ValidationError::invalid_amount(
                row,
                children[row].amount.to_string(),
                "amount is negative",
            ));
        }
        let amount = checked_total(children.iter().map(|c| c.amount))
            .map_err(|row| ValidationError::TotalOverflow { row })?;
        Ok(Self::with_amount(id, job_id, chunk_index, kind, payload_type, children, amount))
    }

    /// Shard for a validated chunk, whose total is already known to fit
    pub(crate) fn from_chunk(
        id: ShardId,
        job_id: impl Into<String>,
        chunk_index: usize,
        kind: impl Into<String>,
        payload_type: PayloadType,
        chunk: &EntityChunk,
    ) -> Self {
        Self::with_amount(
            id,
            job_id,
            chunk_index,
            kind,
            payload_type,
            chunk.entities().to_vec(),
            chunk.total_amount(),
        )
    }

    fn with_amount(
        id: ShardId,
        job_id: impl Into<String>,
        chunk_index: usize,
        kind: impl Into<String>,
        payload_type: PayloadType,
        children: Vec<DisbursementEntity>,
        amount: i64,
    ) -> Self {
        Self {
            id,
            job_id: job_id.into(),
            chunk_index,
            kind: kind.into(),
            payload_type,
            amount,
            filled: 0,
            failed_amount: 0,
            children,
            error_children: Vec::new(),
            settled: 0,
            state: ShardState::Created,
        }
    }

    /// Rebuild a shard on the worker side from a delivered task
    pub fn dispatched(
        id: ShardId,
        job_id: impl Into<String>,
        chunk_index: usize,
        kind: impl Into<String>,
        payload_type: PayloadType,
        children: Vec<DisbursementEntity>,
    ) -> Result<Self, ValidationError> {
        let mut shard = Self::new(id, job_id, chunk_index, kind, payload_type, children)?;
        shard.state = ShardState::Dispatched;
        Ok(shard)
    }

    pub fn id(&self) -> &ShardId {
        &self.id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Target sum of the assigned rows
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Running total successfully written
    pub fn filled(&self) -> i64 {
        self.filled
    }

    pub fn children(&self) -> &[DisbursementEntity] {
        &self.children
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.children.iter().map(|c| &c.key)
    }

    pub fn error_children(&self) -> &[EntityKey] {
        &self.error_children
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn apply(&mut self, event: ShardEvent) -> Result<ShardState, StateTransitionError> {
        if self.state.is_terminal() {
            return Err(StateTransitionError::AlreadyTerminal {
                shard_id: self.id.to_string(),
                state: self.state,
            });
        }
        self.state = determine_target_state(self.state, &event)?;
        Ok(self.state)
    }

    pub(crate) fn record_written(&mut self, amount: i64) -> Result<(), ValidationError> {
        self.filled = self
            .filled
            .checked_add(amount)
            .ok_or(ValidationError::TotalOverflow { row: self.settled })?;
        self.settled += 1;
        Ok(())
    }

    pub(crate) fn record_failed(&mut self, key: EntityKey, amount: i64) -> Result<(), ValidationError> {
        self.failed_amount = self
            .failed_amount
            .checked_add(amount)
            .ok_or(ValidationError::TotalOverflow { row: self.settled })?;
        self.settled += 1;
        self.error_children.push(key);
        Ok(())
    }

    /// Terminal report balances and every error child is one of this shard's children
    pub fn is_balanced(&self) -> bool {
        self.result().is_some_and(|result| {
            result.is_balanced() && result.errors_within(self.child_keys())
        })
    }

    /// Freeze a terminal shard into its report
    pub fn result(&self) -> Option<ShardResult> {
        let outcome = self.state.outcome()?;
        Some(ShardResult {
            shard_id: self.id.clone(),
            job_id: self.job_id.clone(),
            chunk_index: self.chunk_index,
            amount: self.amount,
            filled: self.filled,
            failed_amount: self.failed_amount,
            child_count: self.children.len(),
            error_children: self.error_children.clone(),
            outcome,
            completed_at: Utc::now(),
        })
    }
}

/// Terminal report of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_id: ShardId,
    pub job_id: String,
    pub chunk_index: usize,
    pub amount: i64,
    pub filled: i64,
    pub failed_amount: i64,
    pub child_count: usize,
    pub error_children: Vec<EntityKey>,
    pub outcome: TerminalOutcome,
    pub completed_at: DateTime<Utc>,
}

impl ShardResult {
    /// Children written successfully
    pub fn written_children(&self) -> usize {
        self.child_count.saturating_sub(self.error_children.len())
    }

    /// `filled + failed_amount == amount`, no duplicate error children, and no more errors than children
    pub fn is_balanced(&self) -> bool {
        let unique: HashSet<&EntityKey> = self.error_children.iter().collect();
        self.filled.checked_add(self.failed_amount) == Some(self.amount)
            && unique.len() == self.error_children.len()
            && self.error_children.len() <= self.child_count
    }

    /// Every error child is one of `children`
    pub fn errors_within<'a>(&self, children: impl IntoIterator<Item = &'a EntityKey>) -> bool {
        let children: HashSet<&EntityKey> = children.into_iter().collect();
        self.error_children.iter().all(|key| children.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payload::EntityPayload;

    fn child(name: &str, amount: i64) -> DisbursementEntity {
        DisbursementEntity {
            key: EntityKey::new("Payout", name),
            recipient: name.to_string(),
            amount,
            payload: EntityPayload::for_row(PayloadType::WalletData, name, name, amount),
        }
    }

    #[test]
    fn test_amount_is_sum_of_children() {
        let shard = Shard::new(
            ShardId::from("s-1"),
            "job",
            0,
            "Payout",
            PayloadType::WalletData,
            vec![child("a", 100), child("b", 250)],
        )
        .unwrap();
        assert_eq!(shard.amount(), 350);
        assert_eq!(shard.filled(), 0);
        assert_eq!(shard.state(), ShardState::Created);
        assert!(shard.result().is_none());
    }

    #[test]
    fn test_terminal_shard_is_frozen() {
        let mut shard = Shard::dispatched(
            ShardId::from("s-2"),
            "job",
            1,
            "Payout",
            PayloadType::WalletData,
            vec![child("a", 100), child("b", 250)],
        )
        .unwrap();
        shard.apply(ShardEvent::Start).unwrap();
        shard.record_written(100).unwrap();
        shard.record_failed(EntityKey::new("Payout", "b"), 250).unwrap();
        shard.apply(ShardEvent::Finish { failed_children: 1 }).unwrap();

        let result = shard.result().unwrap();
        assert_eq!(result.outcome, TerminalOutcome::PartialFailure);
        assert_eq!(result.filled, 100);
        assert_eq!(result.written_children(), 1);
        assert!(result.is_balanced());
        assert!(shard.is_balanced());

        assert!(matches!(
            shard.apply(ShardEvent::Start),
            Err(StateTransitionError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn test_children_whose_total_overflows_are_rejected() {
        let built = Shard::new(
            ShardId::from("s-3"),
            "job",
            0,
            "Payout",
            PayloadType::Pair,
            vec![child("a", i64::MAX), child("b", i64::MAX)],
        );
        assert_eq!(built, Err(ValidationError::TotalOverflow { row: 1 }));

        let negative = Shard::new(
            ShardId::from("s-4"),
            "job",
            0,
            "Payout",
            PayloadType::Pair,
            vec![child("a", 10), child("b", -5)],
        );
        assert!(matches!(negative, Err(ValidationError::InvalidAmount { row: 1, .. })));
    }

    #[test]
    fn test_error_children_outside_the_shard_do_not_balance() {
        let mut shard = Shard::dispatched(
            ShardId::from("s-5"),
            "job",
            0,
            "Payout",
            PayloadType::Pair,
            vec![child("a", 100)],
        )
        .unwrap();
        shard.apply(ShardEvent::Start).unwrap();
        shard.record_failed(EntityKey::new("Payout", "stranger"), 100).unwrap();
        shard.apply(ShardEvent::Finish { failed_children: 1 }).unwrap();

        let result = shard.result().unwrap();
        assert!(result.is_balanced());
        assert!(!result.errors_within(shard.child_keys()));
        assert!(!shard.is_balanced());
    }

    #[test]
    fn test_recording_past_the_i64_range_fails() {
        let mut shard = Shard::dispatched(
            ShardId::from("s-6"),
            "job",
            0,
            "Payout",
            PayloadType::Pair,
            vec![child("a", i64::MAX)],
        )
        .unwrap();
        shard.record_written(i64::MAX).unwrap();
        assert_eq!(shard.record_written(1), Err(ValidationError::TotalOverflow { row: 1 }));
        assert_eq!(shard.filled(), i64::MAX);
    }
}
