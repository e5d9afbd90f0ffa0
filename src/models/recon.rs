use serde::{Deserialize, Serialize};

/// Job-level reconciliation summary: `{"TotalDisburse": n, "TotalDisbursees": n}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recon {
    /// Sum of every shard's successfully written amount, in minor units
    #[serde(rename = "TotalDisburse")]
    pub total_disburse: i64,
    /// Count of successfully written rows
    #[serde(rename = "TotalDisbursees")]
    pub total_disbursees: u64,
}
