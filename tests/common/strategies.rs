use super::builders::KIND;
use chrono::{TimeZone, Utc};
use disburse_core::models::{DisburseRow, EntityKey, ShardId, ShardResult};
use disburse_core::state_machine::TerminalOutcome;
use proptest::prelude::*;

/// Non-negative integral amounts, some with a zero fractional part
pub fn amount_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0i64..1_000_000).prop_map(|n| n.to_string()),
        (0i64..1_000_000).prop_map(|n| format!("{n}.00")),
    ]
}

pub fn row_strategy() -> impl Strategy<Value = DisburseRow> {
    (amount_strategy(), "[a-z0-9]{1,16}").prop_map(|(amount, to)| DisburseRow::new(amount, to))
}

pub fn rows_strategy(max_rows: usize) -> impl Strategy<Value = Vec<DisburseRow>> {
    prop::collection::vec(row_strategy(), 1..=max_rows)
}

pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=500
}

/// One terminal result per shard id, with up to `children` failures each
pub fn shard_results_strategy(max_shards: usize) -> impl Strategy<Value = Vec<ShardResult>> {
    prop::collection::vec((1usize..50, 0usize..5, 1i64..1000), 1..=max_shards).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (children, failures, unit))| {
                let failures = failures.min(children);
                let amount = unit * children as i64;
                let failed_amount = unit * failures as i64;
                ShardResult {
                    shard_id: ShardId::new(format!("job-shard-{index:05}")),
                    job_id: "job".to_string(),
                    chunk_index: index,
                    amount,
                    filled: amount - failed_amount,
                    failed_amount,
                    child_count: children,
                    error_children: (0..failures)
                        .map(|f| EntityKey::new(KIND, format!("e-{index}-{f}")))
                        .collect(),
                    outcome: TerminalOutcome::from_failures(failures),
                    completed_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                }
            })
            .collect()
    })
}
