//! # Reconciler
//!
//! Aggregates terminal shard reports into a job-level [`Recon`].
//!
//! Reports are keyed by shard id: a duplicate report of a shard already seen
//! is ignored, so the aggregate never double counts, and the totals do not
//! depend on the order reports arrive in. Reconciliation fails with
//! [`ReconciliationError::IncompleteShards`] when dispatched shards are still
//! missing once the bounded wait has elapsed.

use crate::constants::operations;
use crate::error::ReconciliationError;
use crate::logging::log_job_operation;
use crate::models::{EntityKey, Recon, ShardId, ShardResult};
use crate::store::{ShardLedger, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What happened to one report handed to [`Reconciler::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted,
    /// A report for this shard was already recorded
    Duplicate,
    /// The shard is not one this job dispatched
    Unexpected,
}

/// Job-level reconciliation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconReport {
    pub job_id: String,
    pub recon: Recon,
    /// Failed entity keys across all shards, sorted
    pub retry_candidates: Vec<EntityKey>,
    /// Shards that finished with at least one failed child, sorted
    pub partial_shards: Vec<ShardId>,
    pub shard_count: usize,
}

impl ReconReport {
    pub fn is_clean(&self) -> bool {
        self.retry_candidates.is_empty()
    }
}

/// Aggregate terminal reports, one per shard id
///
/// When several reports share a shard id the earliest completed one is used,
/// ties broken on the reported figures and error children, so the report is
/// the same for every permutation of `results`.
pub fn reconcile(results: &[ShardResult]) -> Result<ReconReport, ReconciliationError> {
    let mut by_shard: BTreeMap<&ShardId, &ShardResult> = BTreeMap::new();
    for result in results {
        by_shard
            .entry(&result.shard_id)
            .and_modify(|kept| {
                if precedence(result) < precedence(kept) {
                    *kept = result;
                }
            })
            .or_insert(result);
    }

    let job_id = by_shard
        .values()
        .next()
        .map(|r| r.job_id.clone())
        .unwrap_or_default();
    aggregate(job_id, by_shard.into_values())
}

fn precedence(result: &ShardResult) -> (DateTime<Utc>, i64, i64, usize, &[EntityKey]) {
    (
        result.completed_at,
        result.filled,
        result.failed_amount,
        result.child_count,
        result.error_children.as_slice(),
    )
}

fn aggregate<'a>(
    job_id: String,
    results: impl Iterator<Item = &'a ShardResult>,
) -> Result<ReconReport, ReconciliationError> {
    let mut recon = Recon::default();
    let mut retry_candidates = BTreeSet::new();
    let mut partial_shards = Vec::new();
    let mut shard_count = 0;

    for result in results {
        shard_count += 1;
        recon.total_disburse = recon.total_disburse.checked_add(result.filled).ok_or_else(|| {
            ReconciliationError::TotalOverflow {
                job_id: job_id.clone(),
                shard_id: result.shard_id.clone(),
            }
        })?;
        recon.total_disbursees += result.written_children() as u64;
        if !result.error_children.is_empty() {
            partial_shards.push(result.shard_id.clone());
            retry_candidates.extend(result.error_children.iter().cloned());
        }
    }
    partial_shards.sort();

    Ok(ReconReport {
        job_id,
        recon,
        retry_candidates: retry_candidates.into_iter().collect(),
        partial_shards,
        shard_count,
    })
}

/// Per-job accumulator of terminal shard reports
#[derive(Debug)]
pub struct Reconciler {
    job_id: String,
    expected: BTreeSet<ShardId>,
    received: BTreeMap<ShardId, ShardResult>,
    started: Instant,
}

impl Reconciler {
    pub fn new(job_id: impl Into<String>, expected: impl IntoIterator<Item = ShardId>) -> Self {
        Self {
            job_id: job_id.into(),
            expected: expected.into_iter().collect(),
            received: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    pub fn received(&self) -> usize {
        self.received.len()
    }

    /// Record one terminal report
    pub fn record(&mut self, result: ShardResult) -> RecordOutcome {
        if !self.expected.contains(&result.shard_id) {
            warn!(
                job_id = %self.job_id,
                shard_id = %result.shard_id,
                "Ignoring report for a shard this job did not dispatch"
            );
            return RecordOutcome::Unexpected;
        }
        if self.received.contains_key(&result.shard_id) {
            debug!(job_id = %self.job_id, shard_id = %result.shard_id, "Duplicate shard report ignored");
            return RecordOutcome::Duplicate;
        }
        self.received.insert(result.shard_id.clone(), result);
        RecordOutcome::Accepted
    }

    /// Expected shards with no report yet, sorted
    pub fn missing(&self) -> Vec<ShardId> {
        self.expected
            .iter()
            .filter(|id| !self.received.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    /// Produce the job report once every expected shard has reported
    pub fn reconcile(&self) -> Result<ReconReport, ReconciliationError> {
        if self.expected.is_empty() {
            return Err(ReconciliationError::NothingToReconcile {
                job_id: self.job_id.clone(),
            });
        }

        let missing = self.missing();
        if !missing.is_empty() {
            let error = ReconciliationError::IncompleteShards {
                job_id: self.job_id.clone(),
                expected: self.expected.len(),
                missing,
                waited_ms: self.started.elapsed().as_millis() as u64,
            };
            log_job_operation(
                operations::RECONCILE,
                &self.job_id,
                None,
                "incomplete",
                Some(&error.to_string()),
            );
            return Err(error);
        }

        let report = match aggregate(self.job_id.clone(), self.received.values()) {
            Ok(report) => report,
            Err(error) => {
                log_job_operation(
                    operations::RECONCILE,
                    &self.job_id,
                    None,
                    "failed",
                    Some(&error.to_string()),
                );
                return Err(error);
            }
        };
        log_job_operation(
            operations::RECONCILE,
            &self.job_id,
            None,
            if report.is_clean() { "reconciled" } else { "reconciled_with_failures" },
            Some(&format!(
                "TotalDisburse {}, TotalDisbursees {}, {} retry candidates",
                report.recon.total_disburse,
                report.recon.total_disbursees,
                report.retry_candidates.len()
            )),
        );
        Ok(report)
    }
}

/// Bounded wait for terminal reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationCollector {
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl ReconciliationCollector {
    pub fn new(wait_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            wait_timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config_manager(config_manager: &crate::config::ConfigManager) -> Self {
        let config = &config_manager.config().reconciliation;
        Self::new(config.wait_timeout(), config.poll_interval())
    }

    /// Record reports from `results` until every shard reported, the
    /// channel closes, or the wait elapses, then reconcile
    pub async fn collect_from_channel(
        &self,
        mut reconciler: Reconciler,
        results: &mut mpsc::UnboundedReceiver<ShardResult>,
    ) -> Result<ReconReport, ReconciliationError> {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;

        while !reconciler.is_complete() {
            match tokio::time::timeout_at(deadline, results.recv()).await {
                Ok(Some(result)) => {
                    reconciler.record(result);
                }
                Ok(None) => {
                    debug!(job_id = %reconciler.job_id(), "Result channel closed");
                    break;
                }
                Err(_) => {
                    warn!(
                        job_id = %reconciler.job_id(),
                        missing = reconciler.missing().len(),
                        "Reconciliation wait elapsed"
                    );
                    break;
                }
            }
        }

        reconciler.reconcile()
    }

    /// Poll the ledger for terminal results until every shard reported or
    /// the wait elapses, then reconcile
    pub async fn collect_from_ledger(
        &self,
        mut reconciler: Reconciler,
        ledger: &dyn ShardLedger,
    ) -> StoreResult<Result<ReconReport, ReconciliationError>> {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;

        loop {
            for result in ledger.terminal_results(&reconciler.missing()).await? {
                reconciler.record(result);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if reconciler.is_complete() || remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }

        info!(
            job_id = %reconciler.job_id(),
            received = reconciler.received(),
            expected = reconciler.expected(),
            "Ledger polling finished"
        );
        Ok(reconciler.reconcile())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::TerminalOutcome;
    use chrono::TimeZone;

    fn result(id: &str, amount: i64, failed: &[(&str, i64)], children: usize) -> ShardResult {
        let failed_amount: i64 = failed.iter().map(|(_, a)| a).sum();
        ShardResult {
            shard_id: ShardId::from(id),
            job_id: "job-1".to_string(),
            chunk_index: 0,
            amount,
            filled: amount - failed_amount,
            failed_amount,
            child_count: children,
            error_children: failed.iter().map(|(k, _)| EntityKey::new("Payout", *k)).collect(),
            outcome: TerminalOutcome::from_failures(failed.len()),
            completed_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ids(names: &[&str]) -> Vec<ShardId> {
        names.iter().map(|n| ShardId::from(*n)).collect()
    }

    #[test]
    fn test_totals_sum_filled_and_written_children() {
        let mut reconciler = Reconciler::new("job-1", ids(&["s-1", "s-2", "s-3"]));
        reconciler.record(result("s-1", 50_000, &[], 500));
        reconciler.record(result("s-2", 50_000, &[], 500));
        reconciler.record(result("s-3", 20_000, &[], 200));

        let report = reconciler.reconcile().unwrap();
        assert_eq!(report.recon.total_disburse, 120_000);
        assert_eq!(report.recon.total_disbursees, 1200);
        assert!(report.is_clean());
    }

    #[test]
    fn test_duplicate_and_unexpected_reports_are_ignored() {
        let mut reconciler = Reconciler::new("job-1", ids(&["s-1"]));
        assert_eq!(reconciler.record(result("s-1", 100, &[], 1)), RecordOutcome::Accepted);
        assert_eq!(reconciler.record(result("s-1", 100, &[], 1)), RecordOutcome::Duplicate);
        assert_eq!(reconciler.record(result("s-9", 100, &[], 1)), RecordOutcome::Unexpected);

        let report = reconciler.reconcile().unwrap();
        assert_eq!(report.recon.total_disburse, 100);
        assert_eq!(report.shard_count, 1);
    }

    #[test]
    fn test_missing_shards_fail_reconciliation() {
        let mut reconciler = Reconciler::new("job-1", ids(&["s-1", "s-2", "s-3"]));
        reconciler.record(result("s-1", 100, &[], 1));
        reconciler.record(result("s-3", 100, &[], 1));

        let err = reconciler.reconcile().unwrap_err();
        assert_eq!(err.missing_shards(), ids(&["s-2"]).as_slice());
    }

    #[test]
    fn test_partial_failures_become_retry_candidates() {
        let report = reconcile(&[
            result("s-2", 300, &[("e-9", 100), ("e-4", 100)], 3),
            result("s-1", 100, &[], 1),
        ])
        .unwrap();
        assert_eq!(report.recon.total_disburse, 200);
        assert_eq!(report.recon.total_disbursees, 2);
        assert_eq!(
            report.retry_candidates,
            vec![EntityKey::new("Payout", "e-4"), EntityKey::new("Payout", "e-9")]
        );
        assert_eq!(report.partial_shards, ids(&["s-2"]));
    }

    #[test]
    fn test_totals_past_the_i64_range_fail_reconciliation() {
        let mut reconciler = Reconciler::new("job-1", ids(&["s-1", "s-2"]));
        reconciler.record(result("s-1", i64::MAX, &[], 1));
        reconciler.record(result("s-2", 1, &[], 1));

        assert!(matches!(
            reconciler.reconcile(),
            Err(ReconciliationError::TotalOverflow { .. })
        ));
        assert!(matches!(
            reconcile(&[result("s-1", i64::MAX, &[], 1), result("s-2", 1, &[], 1)]),
            Err(ReconciliationError::TotalOverflow { .. })
        ));
    }

    #[test]
    fn test_tied_duplicate_reports_resolve_the_same_in_any_order() {
        let mut first = result("s-1", 300, &[("e-2", 100)], 3);
        let mut second = result("s-1", 300, &[("e-1", 100)], 3);
        first.completed_at = second.completed_at;
        second.filled = first.filled;

        let forward = reconcile(&[first.clone(), second.clone()]).unwrap();
        let backward = reconcile(&[second, first]).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.retry_candidates, vec![EntityKey::new("Payout", "e-1")]);
    }

    #[test]
    fn test_empty_job_has_nothing_to_reconcile() {
        let reconciler = Reconciler::new("job-1", Vec::new());
        assert!(matches!(
            reconciler.reconcile(),
            Err(ReconciliationError::NothingToReconcile { .. })
        ));
    }

    #[tokio::test]
    async fn test_channel_collection_times_out_with_missing_shards() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        sender.send(result("s-1", 100, &[], 1)).unwrap();

        let collector = ReconciliationCollector::new(Duration::from_millis(50), Duration::from_millis(5));
        let err = collector
            .collect_from_channel(Reconciler::new("job-1", ids(&["s-1", "s-2"])), &mut receiver)
            .await
            .unwrap_err();

        assert_eq!(err.missing_shards(), ids(&["s-2"]).as_slice());
        drop(sender);
    }
}
