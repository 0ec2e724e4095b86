pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod propagation;
pub mod resolver;
pub mod sections;
pub mod store;
pub mod telemetry;

pub use config::{load_config, load_config_from_str, EngineConfig};
pub use db::{Database, DatabaseError};
pub use engine::{FunnelEngine, GeneratedSection, WriteOutcome};
pub use error::{ConfigError, FunnelError, Result};
pub use generation::{GenerateOptions, GenerationError, Generator, SectionOutcome};
pub use jobs::{BatchMode, GenerationJob, JobProgressBroadcaster, JobStatus, JobStore};
pub use propagation::{PropagationBroadcaster, PropagationEngine, PropagationReport};
pub use resolver::{CoreContext, DependencyResolver, IntakeAnswers, ResolvedContext};
pub use sections::{DependencyGraph, SectionDescriptor, SectionId, SectionStatus};
pub use store::{StoreError, VersionedStore};
pub use telemetry::init_tracing;
