use crate::models::payload::EntityPayload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable store key for one entity
///
/// Keys are generated once at ingestion and frozen inside the process request,
/// so every retry of a write lands on the same key and overwrites.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: String,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One row of a chunk after validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisbursementEntity {
    pub key: EntityKey,
    pub recipient: String,
    /// Minor units
    pub amount: i64,
    pub payload: EntityPayload,
}

/// Sum of `amounts`, or the index of the first amount that overflows i64
pub fn checked_total(amounts: impl IntoIterator<Item = i64>) -> Result<i64, usize> {
    amounts
        .into_iter()
        .enumerate()
        .try_fold(0i64, |total, (index, amount)| total.checked_add(amount).ok_or(index))
}

/// Key/payload pair handed to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedEntity {
    pub key: EntityKey,
    pub payload: EntityPayload,
}

impl From<&DisbursementEntity> for KeyedEntity {
    fn from(entity: &DisbursementEntity) -> Self {
        Self {
            key: entity.key.clone(),
            payload: entity.payload.clone(),
        }
    }
}
