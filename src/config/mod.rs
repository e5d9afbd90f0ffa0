//! # Disbursement Configuration
//!
//! Layered configuration for the pipeline. Every section has serde defaults,
//! so a partial (or missing) file still yields a complete configuration with
//! the store's limits: 500-entity chunks and a 30 second submission deadline.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use disburse_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let chunk_size = manager.config().partition.max_chunk_size;
//! let deadline = manager.config().dispatch.submission_deadline();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{
    environments, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_QUEUE_NAME, DEFAULT_RECONCILIATION_WAIT,
    DEFAULT_SUBMISSION_DEADLINE, MAX_WRITE_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring config/disburse.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisburseConfig {
    /// Chunking of input rows
    pub partition: PartitionConfig,

    /// Queue submission settings
    pub dispatch: DispatchConfig,

    /// Shard execution settings
    pub worker: WorkerConfig,

    /// Bounded wait for terminal shard reports
    pub reconciliation: ReconciliationConfig,

    /// Store grouping and connection settings
    pub datastore: DatastoreConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub max_chunk_size: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub queue_name: String,
    pub submission_deadline_seconds: u64,
}

impl DispatchConfig {
    pub fn submission_deadline(&self) -> Duration {
        Duration::from_secs(self.submission_deadline_seconds)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            submission_deadline_seconds: DEFAULT_SUBMISSION_DEADLINE.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Entities per `write_many` call, at most 500
    pub write_batch_size: usize,
    /// Batches of one shard in flight at once
    pub write_concurrency: usize,
    /// Shards a single runner executes at once
    pub max_concurrent_shards: usize,
    /// Delay between empty reads of a durable queue
    pub poll_interval_ms: u64,
    /// How long a read task stays hidden from other workers
    pub visibility_timeout_seconds: i32,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            write_batch_size: MAX_WRITE_BATCH_SIZE,
            write_concurrency: 1,
            max_concurrent_shards: 8,
            poll_interval_ms: 250,
            visibility_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub wait_timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

impl ReconciliationConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            wait_timeout_seconds: DEFAULT_RECONCILIATION_WAIT.as_secs(),
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Suffix appended to kinds in development; filled at load time when absent
    pub kind_suffix: Option<String>,
    pub namespace_kinds_in_development: bool,
    pub database_url: Option<String>,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            kind_suffix: None,
            namespace_kinds_in_development: true,
            database_url: None,
        }
    }
}

impl DatastoreConfig {
    /// Kind actually written to for `environment`
    ///
    /// Development runs write under `kind + suffix` so local data never lands
    /// in shared kinds; every other environment uses the kind unchanged.
    pub fn resolve_kind(&self, kind: &str, environment: &str) -> String {
        match (&self.kind_suffix, environment) {
            (Some(suffix), environments::DEVELOPMENT) if self.namespace_kinds_in_development => {
                format!("{kind}{suffix}")
            }
            _ => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive; derived from the environment when absent
    pub level: Option<String>,
}

impl DisburseConfig {
    /// Validate sizes and timeouts against the store's limits
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let chunk = self.partition.max_chunk_size;
        if chunk == 0 || chunk > MAX_WRITE_BATCH_SIZE {
            return Err(ConfigurationError::invalid_value(
                "partition.max_chunk_size",
                chunk.to_string(),
                format!("must be between 1 and {MAX_WRITE_BATCH_SIZE}"),
            ));
        }

        let batch = self.worker.write_batch_size;
        if batch == 0 || batch > MAX_WRITE_BATCH_SIZE {
            return Err(ConfigurationError::invalid_value(
                "worker.write_batch_size",
                batch.to_string(),
                format!("must be between 1 and {MAX_WRITE_BATCH_SIZE}"),
            ));
        }

        if self.worker.write_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.write_concurrency",
                "0",
                "write concurrency must be greater than 0",
            ));
        }

        if self.worker.max_concurrent_shards == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.max_concurrent_shards",
                "0",
                "shard concurrency must be greater than 0",
            ));
        }

        if self.worker.visibility_timeout_seconds <= 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.visibility_timeout_seconds",
                self.worker.visibility_timeout_seconds.to_string(),
                "visibility timeout must be greater than 0",
            ));
        }

        if self.dispatch.submission_deadline_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.submission_deadline_seconds",
                "0",
                "submission deadline must be greater than 0",
            ));
        }

        if self.dispatch.queue_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "dispatch.queue_name",
                "dispatch configuration",
            ));
        }

        if self.reconciliation.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.poll_interval_ms",
                "0",
                "poll interval must be greater than 0",
            ));
        }

        Ok(())
    }
}
