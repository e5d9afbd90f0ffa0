//! Configuration Error Types

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Layered sources could not be read or deserialized
    #[error("Failed to load configuration from '{directory}': {error}")]
    LoadError { directory: String, error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },
}

impl ConfigurationError {
    pub fn load_error(directory: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::LoadError {
            directory: directory.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
