//! Multi-section regeneration jobs with persisted progress and a
//! broadcast stream of progress events.

mod progress;
mod runner;
mod store;

use thiserror::Error;

use crate::db::DatabaseError;

pub use progress::{JobProgressBroadcaster, JobProgressEvent, JobProgressTracker, JobStatus};
pub use runner::{BatchMode, JobHandle, JobRunner, SectionTask};
pub use store::{GenerationJob, JobStore};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("A job needs at least one section")]
    EmptyBatch,

    #[error("Jobs can only be started inside a Tokio runtime")]
    NoRuntime,

    #[error("Job task failed: {0}")]
    TaskFailed(String),
}
