//! # Entity Payloads
//!
//! The `Type` discriminator selects one of three concrete entity shapes. The
//! shapes form a closed tagged union; consumers match on it exhaustively.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminator carried by a process request: `1=WalletData`, `2=Voucher`, `3=Pair`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PayloadType {
    WalletData,
    Voucher,
    Pair,
}

impl PayloadType {
    pub fn discriminator(self) -> u8 {
        match self {
            Self::WalletData => 1,
            Self::Voucher => 2,
            Self::Pair => 3,
        }
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::WalletData),
            2 => Ok(Self::Voucher),
            3 => Ok(Self::Pair),
            other => Err(ValidationError::UnknownPayloadType(other)),
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(value: PayloadType) -> Self {
        value.discriminator()
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WalletData => write!(f, "wallet_data"),
            Self::Voucher => write!(f, "voucher"),
            Self::Pair => write!(f, "pair"),
        }
    }
}

/// Concrete entity written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum EntityPayload {
    WalletData {
        key: String,
        balance: i64,
        vouchers: String,
    },
    Voucher {
        key: String,
        id: String,
        amount: i64,
        description: String,
    },
    Pair {
        key: String,
        value: String,
    },
}

impl EntityPayload {
    /// Build the payload for one validated row
    ///
    /// `entity_name` is the row's pre-generated key name; vouchers use it as
    /// their id so a rewrite of the same row produces the same voucher.
    pub fn for_row(payload_type: PayloadType, entity_name: &str, recipient: &str, amount: i64) -> Self {
        match payload_type {
            PayloadType::WalletData => Self::WalletData {
                key: recipient.to_string(),
                balance: amount,
                vouchers: String::new(),
            },
            PayloadType::Voucher => Self::Voucher {
                key: recipient.to_string(),
                id: entity_name.to_string(),
                amount,
                description: format!("Disbursement to {recipient}"),
            },
            PayloadType::Pair => Self::Pair {
                key: recipient.to_string(),
                value: amount.to_string(),
            },
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::WalletData { .. } => PayloadType::WalletData,
            Self::Voucher { .. } => PayloadType::Voucher,
            Self::Pair { .. } => PayloadType::Pair,
        }
    }

    /// Recipient-facing key embedded in the payload
    pub fn key(&self) -> &str {
        match self {
            Self::WalletData { key, .. } | Self::Voucher { key, .. } | Self::Pair { key, .. } => key,
        }
    }
}
