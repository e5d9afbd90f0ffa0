//! # Disbursement Row
//!
//! One transfer instruction as received at ingestion. The amount stays text
//! until validation so no binary floating-point value ever touches it.

use crate::error::ValidationError;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest amount text accepted; i64 needs at most 19 integral digits
const MAX_AMOUNT_LENGTH: usize = 64;

/// `-?digits[.digits]`, the only shape handed to the decimal parser
fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (integral, fraction) = match unsigned.split_once('.') {
        Some((integral, fraction)) => (integral, Some(fraction)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    digits(integral) && fraction.map_or(true, digits)
}

/// A single disbursement instruction: `{"amount": "<decimal>", "to": "<recipient>"}`
///
/// `amount` is denominated in minor currency units and must be a
/// non-negative integral decimal (`"100"` and `"100.00"` are accepted,
/// `"100.5"` is not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisburseRow {
    pub amount: String,
    pub to: String,
}

impl DisburseRow {
    pub fn new(amount: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            to: to.into(),
        }
    }

    /// Parse the amount into minor units, reporting `row` on failure
    pub fn parse_amount(&self, row: usize) -> Result<i64, ValidationError> {
        let text = self.amount.trim();
        if text.is_empty() {
            return Err(ValidationError::invalid_amount(row, &self.amount, "amount is empty"));
        }

        if text.len() > MAX_AMOUNT_LENGTH {
            return Err(ValidationError::invalid_amount(
                row,
                &self.amount,
                format!("amount longer than {MAX_AMOUNT_LENGTH} characters"),
            ));
        }
        if !is_plain_decimal(text) {
            return Err(ValidationError::invalid_amount(
                row,
                &self.amount,
                "not a plain decimal",
            ));
        }

        let value = BigDecimal::from_str(text).map_err(|e| {
            ValidationError::invalid_amount(row, &self.amount, format!("not a decimal: {e}"))
        })?;

        if value < BigDecimal::from(0i64) {
            return Err(ValidationError::invalid_amount(row, &self.amount, "amount is negative"));
        }

        if !value.is_integer() {
            return Err(ValidationError::invalid_amount(
                row,
                &self.amount,
                "amount has a fractional minor unit",
            ));
        }

        value.to_i64().ok_or_else(|| {
            ValidationError::invalid_amount(row, &self.amount, "amount exceeds the i64 range")
        })
    }

    /// Trimmed recipient identifier, rejecting blank values
    pub fn recipient(&self, row: usize) -> Result<&str, ValidationError> {
        let recipient = self.to.trim();
        if recipient.is_empty() {
            return Err(ValidationError::EmptyRecipient { row });
        }
        Ok(recipient)
    }
}
