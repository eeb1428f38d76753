//! Integration tests for configuration loading and validation
//!
//! Note: Tests that modify environment variables serialize on ENV_MUTEX
//! to avoid interference between tests.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use veil::config::load_config;

// Mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Helper function to clean up environment variables
fn cleanup_env_vars() {
    std::env::remove_var("VEIL_APPLICATION_LOG_LEVEL");
    std::env::remove_var("VEIL_PIPELINE_WORKERS");
    std::env::remove_var("VEIL_PIPELINE_BATCH_SIZE");
    std::env::remove_var("VEIL_ANONYMIZATION_RULES_FILE");
    std::env::remove_var("VEIL_ANONYMIZATION_AUDIT_ENABLED");
    std::env::remove_var("TEST_VEIL_RULES_DIR");
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_complete_config() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config(
        r#"
[application]
log_level = "debug"

[anonymization]
rules_file = "/etc/veil/rules.toml"

[anonymization.audit]
enabled = true
log_path = "/var/log/veil/audit.log"
json_format = false

[pipeline]
workers = 8
batch_size = 250
channel_capacity = 2
io_timeout_seconds = 10
max_retries = 5
retry_delay_ms = 200

[logging]
local_enabled = true
local_path = "/var/log/veil"
local_rotation = "hourly"
"#,
    );

    let config = load_config(temp_file.path()).unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(
        config.anonymization.rules_file,
        PathBuf::from("/etc/veil/rules.toml")
    );
    assert!(config.anonymization.audit.enabled);
    assert!(!config.anonymization.audit.json_format);
    assert_eq!(config.pipeline.workers, 8);
    assert_eq!(config.pipeline.batch_size, 250);
    assert_eq!(config.pipeline.channel_capacity, 2);
    assert_eq!(config.pipeline.io_timeout_seconds, 10);
    assert_eq!(config.pipeline.max_retries, 5);
    assert_eq!(config.pipeline.retry_delay_ms, 200);
    assert!(config.logging.local_enabled);
    assert_eq!(config.logging.local_rotation, "hourly");
}

#[test]
fn test_load_minimal_config_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config("[application]\nlog_level = \"warn\"\n");
    let config = load_config(temp_file.path()).unwrap();

    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.anonymization.rules_file, PathBuf::from("./rules.json"));
    assert!(!config.anonymization.audit.enabled);
    assert_eq!(config.pipeline.batch_size, 100);
    assert_eq!(config.pipeline.channel_capacity, 4);
    assert!(config.pipeline.workers >= 1);
    assert!(!config.logging.local_enabled);
}

#[test]
fn test_env_var_substitution() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("TEST_VEIL_RULES_DIR", "/opt/rules");

    let temp_file = write_config(
        r#"
[anonymization]
rules_file = "${TEST_VEIL_RULES_DIR}/fhir.json"
"#,
    );
    let config = load_config(temp_file.path()).unwrap();
    assert_eq!(
        config.anonymization.rules_file,
        PathBuf::from("/opt/rules/fhir.json")
    );

    cleanup_env_vars();
}

#[test]
fn test_missing_env_var_is_configuration_error() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config(
        r#"
[anonymization]
rules_file = "${TEST_VEIL_RULES_DIR}/fhir.json"
"#,
    );
    let err = load_config(temp_file.path()).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("TEST_VEIL_RULES_DIR"));
}

#[test]
fn test_env_overrides_take_precedence() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("VEIL_APPLICATION_LOG_LEVEL", "trace");
    std::env::set_var("VEIL_PIPELINE_WORKERS", "3");
    std::env::set_var("VEIL_PIPELINE_BATCH_SIZE", "42");
    std::env::set_var("VEIL_ANONYMIZATION_AUDIT_ENABLED", "true");

    let temp_file = write_config(
        r#"
[application]
log_level = "info"

[pipeline]
workers = 8
batch_size = 500
"#,
    );
    let config = load_config(temp_file.path()).unwrap();

    assert_eq!(config.application.log_level, "trace");
    assert_eq!(config.pipeline.workers, 3);
    assert_eq!(config.pipeline.batch_size, 42);
    assert!(config.anonymization.audit.enabled);

    cleanup_env_vars();
}

#[test]
fn test_invalid_env_override_is_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("VEIL_PIPELINE_WORKERS", "many");

    let temp_file = write_config("[pipeline]\nworkers = 2\n");
    let err = load_config(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("VEIL_PIPELINE_WORKERS"));

    cleanup_env_vars();
}

#[test]
fn test_validation_rejects_bad_values() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    for content in [
        "[application]\nlog_level = \"loud\"\n",
        "[pipeline]\nbatch_size = 0\n",
        "[pipeline]\nbatch_size = 20000\n",
        "[pipeline]\nchannel_capacity = 0\n",
        "[pipeline]\nmax_retries = 11\n",
        "[logging]\nlocal_rotation = \"weekly\"\n",
    ] {
        let temp_file = write_config(content);
        let err = load_config(temp_file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2, "expected rejection for: {content}");
    }
}

#[test]
fn test_missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_malformed_toml_is_configuration_error() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config("[pipeline\nworkers = ");
    let err = load_config(temp_file.path()).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
