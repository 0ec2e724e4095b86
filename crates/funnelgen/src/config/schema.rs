use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::generation::{GenerateOptions, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub version: String,
    /// SQLite file. Defaults to `~/.funnelgen/data/funnelgen.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            generation: GenerationConfig::default(),
            store: StoreConfig::default(),
            context: ContextConfig::default(),
            propagation: PropagationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_true")]
    pub json_mode: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call timeout, applied to every attempt and every chunk.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    90
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            json_mode: true,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn options(&self) -> GenerateOptions {
        GenerateOptions {
            json_mode: self.json_mode,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_secs),
            temperature: self.temperature,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_conflict_backoff_ms")]
    pub conflict_backoff_ms: u64,
}

fn default_conflict_retries() -> u32 {
    crate::store::DEFAULT_MAX_CONFLICT_RETRIES
}

fn default_conflict_backoff_ms() -> u64 {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_conflict_retries(),
            conflict_backoff_ms: default_conflict_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Sections with a numeric key at or below this are core sections.
    /// Non-core sections get the core context block in their prompts.
    #[serde(default = "default_core_threshold")]
    pub core_context_threshold: u32,
    /// Only use upstream sections that were approved; everything else is
    /// treated as missing and replaced by intake fallbacks.
    #[serde(default)]
    pub require_approved: bool,
}

fn default_core_threshold() -> u32 {
    4
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            core_context_threshold: default_core_threshold(),
            require_approved: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Off means every propagation, automatic or explicit, is a no-op.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also rewrite whole downstream section documents, not just fields.
    #[serde(default = "default_true")]
    pub section_documents: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            section_documents: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `funnelgen=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
