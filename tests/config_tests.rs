//! Loading the shipped configuration directory per environment.

use commander_core::config::{ConfigManager, ConfigurationError};
use std::fs;
use std::path::PathBuf;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join("commander")
}

#[test]
fn test_test_environment_shrinks_batches() {
    let manager = ConfigManager::load_for_environment(shipped_config_dir(), "test").unwrap();
    let config = manager.config();

    assert_eq!(config.delivery.topic_batch_size, 2);
    assert_eq!(config.delivery.shadow_batch_size, 2);
    assert_eq!(config.delivery.max_job_targets, 2);
    assert_eq!(config.delivery.provisioning_poll_delay_seconds, 0);
    assert_eq!(config.logging.level, "debug");
    // Inherited from base.toml
    assert_eq!(config.storage.max_batch_write_items, 25);
    assert_eq!(config.delivery.shadow_name, "commands");
}

#[test]
fn test_production_environment_disables_migrations() {
    let manager =
        ConfigManager::load_for_environment(shipped_config_dir(), "production").unwrap();
    let config = manager.config();

    assert!(!config.database.run_migrations);
    assert!(config.logging.json);
    assert_eq!(config.queue.max_concurrent_items, 50);
    assert_eq!(config.delivery.topic_batch_size, 50);
}

#[test]
fn test_unknown_environment_falls_back_to_base() {
    let manager = ConfigManager::load_for_environment(shipped_config_dir(), "staging").unwrap();
    assert_eq!(manager.environment(), "staging");
    assert_eq!(manager.config().delivery.max_job_targets, 100);
}

#[test]
fn test_environment_variables_override_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("base.toml"),
        "[deletion]\npage_size = 40\n",
    )
    .unwrap();

    std::env::set_var("COMMANDER__DELETION__PAGE_SIZE", "7");
    let result = ConfigManager::load_for_environment(dir.path(), "test");
    std::env::remove_var("COMMANDER__DELETION__PAGE_SIZE");

    assert_eq!(result.unwrap().config().deletion.page_size, 7);
}

#[test]
fn test_oversized_write_chunk_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("base.toml"),
        "[storage]\nmax_batch_write_items = 26\n",
    )
    .unwrap();

    let err = ConfigManager::load_for_environment(dir.path(), "test").unwrap_err();
    match err {
        ConfigurationError::InvalidValue { field, .. } => {
            assert_eq!(field, "storage.max_batch_write_items")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_blank_required_field_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("test.toml"),
        "[delivery]\nreply_topic_prefix = \"  \"\n",
    )
    .unwrap();

    let err = ConfigManager::load_for_environment(dir.path(), "test").unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::MissingRequiredField { .. }
    ));
}
