//! Loading the checked-in configuration files.

use disburse_core::config::{ConfigManager, LogFormat};
use std::path::PathBuf;
use std::time::Duration;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_base_configuration_matches_store_limits() {
    let manager = ConfigManager::load_from_directory_with_env(Some(config_dir()), "staging").unwrap();
    let config = manager.config();

    assert_eq!(config.partition.max_chunk_size, 500);
    assert_eq!(config.worker.write_batch_size, 500);
    assert_eq!(config.dispatch.submission_deadline(), Duration::from_secs(30));
    assert_eq!(config.reconciliation.wait_timeout(), Duration::from_secs(300));
    assert_eq!(manager.resolve_kind("Payout"), "Payout");
}

#[test]
fn test_test_environment_shortens_waits() {
    let manager = ConfigManager::load_from_directory_with_env(Some(config_dir()), "test").unwrap();
    let config = manager.config();

    assert_eq!(config.dispatch.submission_deadline(), Duration::from_secs(5));
    assert_eq!(config.reconciliation.poll_interval(), Duration::from_millis(20));
    assert_eq!(config.logging.level.as_deref(), Some("debug"));
}

#[test]
fn test_production_logs_json() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(config_dir()), "production").unwrap();
    assert_eq!(manager.config().logging.format, LogFormat::Json);
    assert_eq!(manager.config().worker.max_concurrent_shards, 32);
    assert_eq!(manager.config().partition.max_chunk_size, 500);
}

#[test]
fn test_development_namespaces_kinds() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(config_dir()), "development").unwrap();
    let resolved = manager.resolve_kind("Payout");

    assert!(resolved.starts_with("Payout"));
    assert_ne!(resolved, "Payout");
}

#[test]
fn test_environment_variables_override_files() {
    // No other test in this binary reads the queue name
    std::env::set_var("DISBURSE__DISPATCH__QUEUE_NAME", "payouts_from_env");
    let manager = ConfigManager::load_from_directory_with_env(Some(config_dir()), "test").unwrap();
    std::env::remove_var("DISBURSE__DISPATCH__QUEUE_NAME");

    assert_eq!(manager.config().dispatch.queue_name, "payouts_from_env");
}
