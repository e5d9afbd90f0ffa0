//! # Structured Logging Module
//!
//! Environment-aware structured logging for the disbursement pipeline. Console
//! output is human readable by default and JSON when configured.

use crate::config::{LogFormat, LoggingConfig};
use crate::constants::environments;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber, and
/// an already installed global subscriber is left in place.
pub fn init_structured_logging(environment: &str, logging: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = logging
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(environment).to_string());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

        let layer = match logging.format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            level = %directive,
            "Structured logging initialized"
        );
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        environments::TEST => "debug",
        environments::DEVELOPMENT => "debug",
        environments::PRODUCTION => "info",
        _ => "debug",
    }
}

/// Log structured data for job-level operations
pub fn log_job_operation(
    operation: &str,
    job_id: &str,
    kind: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        kind = kind,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log structured data for shard operations
pub fn log_shard_operation(
    operation: &str,
    job_id: &str,
    shard_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        shard_id = %shard_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "SHARD_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
