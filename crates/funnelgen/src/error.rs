use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Generation error: {0}")]
    Generation(#[from] crate::generation::GenerationError),

    #[error("Dependency graph error: {0}")]
    Graph(#[from] crate::sections::GraphError),

    #[error("Propagation error: {0}")]
    Propagation(#[from] crate::propagation::PropagationError),

    #[error("Job error: {0}")]
    Job(#[from] crate::jobs::JobError),

    #[error(transparent)]
    UnknownSection(#[from] crate::sections::UnknownSection),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FunnelError>;
