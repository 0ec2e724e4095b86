//! Test harness for isolated engine execution.
//!
//! Every harness owns its own in-memory database and scripted generator,
//! so tests never share state.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use funnelgen::config::EngineConfig;
use funnelgen::db::Database;
use funnelgen::{FunnelEngine, IntakeAnswers, SectionId, SectionStatus};

use super::generator::ScriptedGenerator;

pub const FUNNEL: &str = "funnel-1";

pub struct TestHarness {
    pub engine: FunnelEngine,
    pub generator: Arc<ScriptedGenerator>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Self::fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let generator = Arc::new(ScriptedGenerator::new());
        let engine = FunnelEngine::with_database(
            &config,
            Database::open_in_memory().expect("Failed to create test database"),
            generator.clone(),
        );
        Self { engine, generator }
    }

    /// Short timeouts and delays; the retry bound stays at 3 attempts.
    pub fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.generation.timeout_secs = 5;
        config.generation.base_delay_ms = 10;
        config.generation.max_delay_ms = 40;
        config.store.conflict_backoff_ms = 1;
        config
    }

    pub fn intake() -> IntakeAnswers {
        IntakeAnswers::new()
            .with("idealClient", "Burned-out agency owners")
            .with("message", "Run your agency in four days a week")
            .with("offer", "Acme")
    }

    /// Stores a section document and its field rows as a generation would.
    pub fn seed_section(&self, section: SectionId, content: Value) {
        let store = self.engine.store();
        store
            .write_section(FUNNEL, section, &content, SectionStatus::Generated)
            .expect("seed section");
        store
            .sync_fields(FUNNEL, section, &content)
            .expect("seed fields");
    }

    pub fn field(&self, section: SectionId, field_id: &str) -> Option<funnelgen::store::StoredField> {
        self.engine
            .store()
            .current_field(FUNNEL, section, field_id)
            .expect("read field")
    }

    pub fn section(&self, section: SectionId) -> Option<funnelgen::store::StoredSection> {
        self.engine
            .current_section(FUNNEL, section)
            .expect("read section")
    }
}
