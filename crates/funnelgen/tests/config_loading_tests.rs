//! Table-driven tests for engine configuration loading and validation.

use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;

use funnelgen::config::loader::{ENV_DATABASE_PATH, ENV_LOG, ENV_LOG_JSON};
use funnelgen::config::{config_from_env, load_config, load_config_from_str};

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config JSON content to test.
    config_json: &'static str,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{"version": "1.0"}"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/var/lib/funnelgen/funnels.db",
            "generation": {
                "json_mode": true,
                "max_tokens": 8192,
                "temperature": 0.4,
                "timeout_secs": 120,
                "max_attempts": 4,
                "base_delay_ms": 500,
                "max_delay_ms": 8000
            },
            "store": { "max_conflict_retries": 8, "conflict_backoff_ms": 5 },
            "context": { "core_context_threshold": 4, "require_approved": true },
            "propagation": { "enabled": true, "section_documents": false },
            "logging": { "level": "funnelgen=debug,warn", "json": true }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_null_database_path",
        config_json: r#"{"version": "1.0", "database_path": null}"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{"version": "1.0""#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{"generation": {}}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{"version": "2.0"}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_top_level_key",
        config_json: r#"{"version": "1.0", "workers": 4}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_generation_key",
        config_json: r#"{"version": "1.0", "generation": {"model": "large"}}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_attempts",
        config_json: r#"{"version": "1.0", "generation": {"max_attempts": 0}}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "temperature_out_of_range",
        config_json: r#"{"version": "1.0", "generation": {"temperature": 3.5}}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "wrong_type",
        config_json: r#"{"version": "1.0", "propagation": {"enabled": "yes"}}"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "base_delay_above_max",
        config_json: r#"{"version": "1.0", "generation": {"base_delay_ms": 5000, "max_delay_ms": 100}}"#,
        should_succeed: false,
        expected_error: Some("base_delay_ms must not exceed"),
    },
    ConfigTestCase {
        name: "core_threshold_too_large",
        config_json: r#"{"version": "1.0", "context": {"core_context_threshold": 18}}"#,
        should_succeed: false,
        expected_error: Some("core_context_threshold must be at most 17"),
    },
    ConfigTestCase {
        name: "bad_log_filter",
        config_json: r#"{"version": "1.0", "logging": {"level": "funnelgen=loud"}}"#,
        should_succeed: false,
        expected_error: Some("Invalid log filter"),
    },
];

fn clear_env() {
    for key in [ENV_DATABASE_PATH, ENV_LOG, ENV_LOG_JSON] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_json_config_loading() {
    clear_env();
    for test_case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(test_case.config_json);

        if test_case.should_succeed {
            assert!(
                result.is_ok(),
                "Test '{}': Expected success but got error: {:?}",
                test_case.name,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Test '{}': Expected error but got success",
                test_case.name
            );

            if let Some(expected_error) = test_case.expected_error {
                let error_msg = result.err().unwrap().to_string();
                assert!(
                    error_msg.contains(expected_error),
                    "Test '{}': Expected error containing '{}', got '{}'",
                    test_case.name,
                    expected_error,
                    error_msg
                );
            }
        }
    }
}

#[test]
#[serial]
fn test_valid_config_field_values() {
    clear_env();
    let config = load_config_from_str(
        r#"{
            "version": "1.0",
            "database_path": "/data/funnels.db",
            "generation": { "timeout_secs": 30, "max_attempts": 2 },
            "context": { "require_approved": true },
            "propagation": { "section_documents": false }
        }"#,
    )
    .unwrap();

    assert_eq!(config.database_path, Some(PathBuf::from("/data/funnels.db")));
    assert_eq!(config.generation.timeout_secs, 30);
    assert_eq!(config.generation.max_attempts, 2);
    assert!(config.context.require_approved);
    assert!(config.propagation.enabled);
    assert!(!config.propagation.section_documents);
}

#[test]
#[serial]
fn test_config_defaults_applied() {
    clear_env();
    let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();

    assert!(config.generation.json_mode);
    assert_eq!(config.generation.timeout_secs, 90);
    assert_eq!(config.generation.max_attempts, 3);
    assert_eq!(config.context.core_context_threshold, 4);
    assert!(!config.context.require_approved);
    assert!(config.propagation.enabled);
    assert!(config.propagation.section_documents);
    assert_eq!(config.logging.level, "info");
    assert!(!config.logging.json);
}

#[test]
#[serial]
fn test_load_config_from_file() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"version": "1.0", "logging": {{"level": "debug"}}}}"#).unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_missing_config_file() {
    clear_env();
    let err = load_config("/nonexistent/funnelgen.json").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
#[serial]
fn test_environment_overrides_file_values() {
    clear_env();
    std::env::set_var(ENV_DATABASE_PATH, "/tmp/override.db");
    std::env::set_var(ENV_LOG, "funnelgen=trace");
    std::env::set_var(ENV_LOG_JSON, "yes");

    let config = load_config_from_str(
        r#"{"version": "1.0", "database_path": "/data/funnels.db", "logging": {"level": "warn"}}"#,
    );
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.database_path, Some(PathBuf::from("/tmp/override.db")));
    assert_eq!(config.logging.level, "funnelgen=trace");
    assert!(config.logging.json);
}

#[test]
#[serial]
fn test_invalid_log_filter_from_environment() {
    clear_env();
    std::env::set_var(ENV_LOG, "funnelgen=loud");
    let result = config_from_env();
    clear_env();

    assert!(result.unwrap_err().to_string().contains("Invalid log filter"));
}

#[test]
#[serial]
fn test_blank_environment_values_are_ignored() {
    clear_env();
    std::env::set_var(ENV_DATABASE_PATH, "  ");
    let config = config_from_env();
    clear_env();

    assert!(config.unwrap().database_path.is_none());
}
