use std::path::{Path, PathBuf};

use crate::config::schema::EngineConfig;
use crate::error::ConfigError;
use crate::sections::SectionId;

const SCHEMA_JSON: &str = include_str!("../../schema/engine-config-v1.json");

pub const ENV_DATABASE_PATH: &str = "FUNNELGEN_DATABASE_PATH";
pub const ENV_LOG: &str = "FUNNELGEN_LOG";
pub const ENV_LOG_JSON: &str = "FUNNELGEN_LOG_JSON";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses, validates and applies environment overrides.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: EngineConfig = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn config_from_env() -> Result<EngineConfig, ConfigError> {
    let mut config = EngineConfig::default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut EngineConfig) {
    if let Some(path) = non_empty_env(ENV_DATABASE_PATH) {
        log::debug!("Database path overridden by {}", ENV_DATABASE_PATH);
        config.database_path = Some(PathBuf::from(path));
    }
    if let Some(level) = non_empty_env(ENV_LOG) {
        config.logging.level = level;
    }
    if let Some(flag) = non_empty_env(ENV_LOG_JSON) {
        config.logging.json = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let generation = &config.generation;
    if generation.max_attempts == 0 {
        return Err(invalid("generation.max_attempts must be at least 1"));
    }
    if generation.timeout_secs == 0 {
        return Err(invalid("generation.timeout_secs must be greater than 0"));
    }
    if generation.base_delay_ms > generation.max_delay_ms {
        return Err(invalid(
            "generation.base_delay_ms must not exceed generation.max_delay_ms",
        ));
    }
    if config.store.max_conflict_retries == 0 {
        return Err(invalid("store.max_conflict_retries must be at least 1"));
    }

    let threshold = config.context.core_context_threshold;
    if threshold as usize > SectionId::ALL.len() {
        return Err(invalid(format!(
            "context.core_context_threshold must be at most {}, got {}",
            SectionId::ALL.len(),
            threshold
        )));
    }

    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
        return Err(ConfigError::InvalidLogFilter {
            filter: config.logging.level.clone(),
            reason: e.to_string(),
        });
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
