//! # Queue Error Types
//!
//! Structured errors for task submission, using thiserror instead of
//! `Box<dyn Error>` patterns.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue closed: {queue_name}")]
    QueueClosed { queue_name: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },
}

impl QueueError {
    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_closed(queue_name: impl Into<String>) -> Self {
        Self::QueueClosed {
            queue_name: queue_name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Conversion from sqlx::Error to QueueError
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => QueueError::timeout("database_pool", 30_000),
            sqlx::Error::Database(db_err) => QueueError::database_query("database", db_err.to_string()),
            other => QueueError::database_query("query", other.to_string()),
        }
    }
}

/// Conversion from serde_json::Error to QueueError
impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            QueueError::MessageDeserialization {
                message: err.to_string(),
            }
        } else {
            QueueError::MessageSerialization {
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
