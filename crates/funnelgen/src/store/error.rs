use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// A versioned write kept colliding with concurrent writers.
    #[error("Concurrent writes to {entity} did not settle after {attempts} attempts")]
    ConcurrencyConflict { entity: String, attempts: u32 },

    #[error("Failed to serialize value for {entity}: {source}")]
    Serialization {
        entity: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored row {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Cannot write '{path}': parent field '{parent}' is not an object")]
    ParentNotObject { parent: String, path: String },

    #[error("Field path must not be empty")]
    EmptyFieldPath,

    #[error("Store task for {entity} did not finish: {reason}")]
    TaskFailed { entity: String, reason: String },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}
