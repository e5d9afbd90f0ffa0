//! Configuration Loader
//!
//! Environment-aware loading: `disburse.yaml`, then `disburse.<env>.yaml`, then
//! `DISBURSE__<SECTION>__<KEY>` environment variables, later sources winning.

use super::error::{ConfigResult, ConfigurationError};
use super::DisburseConfig;
use crate::constants::environments;
use chrono::Utc;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "disburse.yaml";
const ENV_PREFIX: &str = "DISBURSE";

/// Loaded configuration together with the environment it was resolved for
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: DisburseConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::load_layers(&config_directory, environment)?;

        if config.datastore.kind_suffix.is_none() && environment == environments::DEVELOPMENT {
            config.datastore.kind_suffix = Some(Self::startup_kind_suffix());
        }

        config.validate()?;

        info!(
            environment = %environment,
            config_directory = %config_directory.display(),
            max_chunk_size = config.partition.max_chunk_size,
            queue_name = %config.dispatch.queue_name,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding hosts)
    pub fn from_config(config: DisburseConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DisburseConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Kind written to for `kind` in this environment
    pub fn resolve_kind(&self, kind: &str) -> String {
        self.config.datastore.resolve_kind(kind, &self.environment)
    }

    /// Get current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("DISBURSE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| environments::DEVELOPMENT.to_string())
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }

    fn load_layers(directory: &Path, environment: &str) -> ConfigResult<DisburseConfig> {
        let base = directory.join(BASE_FILE);
        let overrides = directory.join(format!("disburse.{environment}.yaml"));

        let layered = Config::builder()
            .add_source(File::new(&base.to_string_lossy(), FileFormat::Yaml).required(false))
            .add_source(File::new(&overrides.to_string_lossy(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(directory.display().to_string(), e))?;

        layered
            .try_deserialize::<DisburseConfig>()
            .map_err(|e| ConfigurationError::load_error(directory.display().to_string(), e))
    }

    /// Timestamp suffix taken once per process so one local run shares one namespace
    fn startup_kind_suffix() -> String {
        Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
