//! # System Constants
//!
//! Operational boundaries of the disbursement pipeline. The write-batch cap is
//! imposed by the backing store and is never configurable above its value.

use std::time::Duration;

/// Maximum number of keyed writes accepted by the store in one call
pub const MAX_WRITE_BATCH_SIZE: usize = 500;

/// Default chunk size used by the partitioner
pub const DEFAULT_MAX_CHUNK_SIZE: usize = MAX_WRITE_BATCH_SIZE;

/// Default bound on a single queue submission
pub const DEFAULT_SUBMISSION_DEADLINE: Duration = Duration::from_secs(30);

/// Default bound on waiting for terminal shard reports
pub const DEFAULT_RECONCILIATION_WAIT: Duration = Duration::from_secs(300);

/// Default queue receiving shard tasks
pub const DEFAULT_QUEUE_NAME: &str = "disbursement_shards";

/// Structured log operation names
pub mod operations {
    pub const PARTITION: &str = "partition";
    pub const DISPATCH: &str = "dispatch";
    pub const RESUBMIT: &str = "resubmit";
    pub const PROCESS_SHARD: &str = "process_shard";
    pub const RECONCILE: &str = "reconcile";
}

/// Environment names recognised by configuration and kind resolution
pub mod environments {
    pub const DEVELOPMENT: &str = "development";
    pub const TEST: &str = "test";
    pub const PRODUCTION: &str = "production";
}
