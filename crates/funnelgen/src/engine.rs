//! The engine facade: dependency resolution, section generation, field
//! writes with background propagation, and regeneration jobs over one
//! shared versioned store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::db::attempt_repo::{self, AttemptResult, AttemptRow};
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Result};
use crate::generation::{GenerationPipeline, Generator, PromptBuilder, SectionOutcome};
use crate::jobs::{
    BatchMode, GenerationJob, JobHandle, JobProgressBroadcaster, JobProgressEvent, JobRunner,
    JobStore, SectionTask,
};
use crate::propagation::{
    PropagationEngine, PropagationEvent, PropagationHandle, PropagationReport, PropagationRequest,
};
use crate::resolver::{DependencyResolver, IntakeAnswers, ResolvedContext};
use crate::sections::{DependencyGraph, SectionId, SectionStatus};
use crate::store::value::{get_path, split_path};
use crate::store::{FieldWrite, StoreError, StoredField, StoredSection, VersionedStore};

/// Result of [`FunnelEngine::generate_section`].
pub struct GeneratedSection {
    pub outcome: SectionOutcome,
    /// Version of the stored document. `None` when generation failed and
    /// the previous version was kept.
    pub version: Option<i64>,
    /// Background propagation of atomic fields the new content changed.
    pub propagations: Vec<PropagationHandle>,
}

/// Result of [`FunnelEngine::write_field`].
pub struct WriteOutcome {
    pub write: FieldWrite,
    /// One handle per atomic field the write changed. Writing a parent
    /// object can change several nested atomic fields at once.
    pub propagations: Vec<PropagationHandle>,
}

impl WriteOutcome {
    pub fn version(&self) -> i64 {
        self.write.version
    }
}

#[derive(Clone)]
pub struct FunnelEngine {
    store: VersionedStore,
    graph: Arc<DependencyGraph>,
    resolver: DependencyResolver,
    pipeline: Arc<GenerationPipeline>,
    propagation: PropagationEngine,
    jobs: JobStore,
    job_progress: JobProgressBroadcaster,
}

impl FunnelEngine {
    /// Opens the configured database (or the default one) and builds the
    /// engine around it.
    pub fn open(config: &EngineConfig, generator: Arc<dyn Generator>) -> Result<Self> {
        let path = config
            .database_path
            .clone()
            .or_else(default_database_path)
            .ok_or_else(|| ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })?;
        let db = Database::open(&path)?;
        Ok(Self::with_database(config, db, generator))
    }

    pub fn with_database(config: &EngineConfig, db: Database, generator: Arc<dyn Generator>) -> Self {
        Self::with_graph(config, db, generator, DependencyGraph::standard())
    }

    pub fn with_graph(
        config: &EngineConfig,
        db: Database,
        generator: Arc<dyn Generator>,
        graph: DependencyGraph,
    ) -> Self {
        let graph = Arc::new(graph);
        let store = VersionedStore::new(db.clone()).with_retry_policy(
            config.store.max_conflict_retries,
            std::time::Duration::from_millis(config.store.conflict_backoff_ms),
        );
        let resolver = DependencyResolver::new(store.clone(), Arc::clone(&graph), config.context);
        let pipeline = GenerationPipeline::new(
            generator,
            config.generation.retry_policy(),
            config.generation.options(),
            PromptBuilder::new(config.context.core_context_threshold),
        );
        let propagation = PropagationEngine::new(store.clone(), Arc::clone(&graph), config.propagation);

        Self {
            store,
            graph,
            resolver,
            pipeline: Arc::new(pipeline),
            propagation,
            jobs: JobStore::new(db),
            job_progress: JobProgressBroadcaster::default(),
        }
    }

    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    // ─── Resolution & generation ────────────────────────────────────────────

    pub fn resolve_dependencies(
        &self,
        funnel_id: &str,
        section: SectionId,
        intake: &IntakeAnswers,
    ) -> ResolvedContext {
        self.resolver.resolve(funnel_id, section, intake)
    }

    /// Generates `section` and persists it as `generated`. A failed
    /// generation is recorded in the attempt log only, so the previous
    /// version stays current.
    pub async fn generate_section(
        &self,
        funnel_id: &str,
        section: SectionId,
        intake: &IntakeAnswers,
    ) -> Result<GeneratedSection> {
        let span = info_span!("engine_generate", funnel_id = %funnel_id, section = %section);
        async move {
            let db = self.store.database();
            let attempt_id = attempt_repo::start(db, funnel_id, section.as_str())?;

            let context = self.resolver.resolve(funnel_id, section, intake);
            let core = self
                .pipeline
                .prompts()
                .includes_core_context(section)
                .then(|| self.resolver.build_core_context(funnel_id, intake));
            let outcome = self.pipeline.generate(section, &context, core.as_ref()).await;

            let persisted = match &outcome.content {
                Some(content) if outcome.is_generated() => self
                    .persist_off_runtime(funnel_id, section, content.clone())
                    .await
                    .map(Some),
                _ => Ok(None),
            };

            let (version, propagations, store_error) = match persisted {
                Ok(Some((version, handles))) => (Some(version), handles, None),
                Ok(None) => (None, Vec::new(), None),
                Err(e) => (None, Vec::new(), Some(e)),
            };

            let status = match &store_error {
                Some(_) => SectionStatus::Failed,
                None => outcome.status,
            };
            let error = store_error
                .as_ref()
                .map(|e| format!("Could not store generated content: {e}"))
                .or_else(|| outcome.error.clone());
            attempt_repo::finish(
                db,
                &attempt_id,
                &AttemptResult {
                    status: status.as_str(),
                    error: error.as_deref(),
                    failed_chunks: &outcome.failed_chunks,
                    validation_issues: &outcome.issues,
                    content_version: version,
                },
            )?;

            if let Some(e) = store_error {
                return Err(e.into());
            }
            match version {
                Some(v) => info!(version = v, "Section stored"),
                None => warn!("Section not stored, previous version kept"),
            }

            Ok(GeneratedSection {
                outcome,
                version,
                propagations,
            })
        }
        .instrument(span)
        .await
    }

    /// Runs [`persist_generated`](Self::persist_generated) on the blocking pool.
    async fn persist_off_runtime(
        &self,
        funnel_id: &str,
        section: SectionId,
        content: Value,
    ) -> std::result::Result<(i64, Vec<PropagationHandle>), StoreError> {
        let engine = self.clone();
        let owned_funnel = funnel_id.to_string();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            engine.persist_generated(&owned_funnel, section, &content)
        })
        .await
        .unwrap_or_else(|e| {
            Err(StoreError::TaskFailed {
                entity: format!("section {funnel_id}/{section}"),
                reason: e.to_string(),
            })
        })
    }

    /// Writes the new document, then its field rows. Once the document is
    /// current the generation counts as stored: a failed field sync is
    /// logged and atomic changes still propagate.
    fn persist_generated(
        &self,
        funnel_id: &str,
        section: SectionId,
        content: &Value,
    ) -> std::result::Result<(i64, Vec<PropagationHandle>), StoreError> {
        let atomic = self.graph.atomic_fields(section);
        let before = atomic
            .iter()
            .map(|path| Ok((path, self.current_value_at(funnel_id, section, path)?)))
            .collect::<std::result::Result<Vec<_>, StoreError>>()?;

        let stored = self
            .store
            .write_section(funnel_id, section, content, SectionStatus::Generated)?;
        if let Err(e) = self.store.sync_fields(funnel_id, section, content) {
            warn!(version = stored.version, "Field rows not synced with the new document: {e}");
        }

        let mut handles = Vec::new();
        for (path, old) in before {
            let (Some(old), Some(new)) = (old, get_path(content, path)) else {
                continue;
            };
            if self.propagation.should_propagate(section, path, &old, new) {
                debug!(field_id = %path, "Regeneration changed an atomic field");
                handles.push(self.propagation.spawn(PropagationRequest {
                    funnel_id: funnel_id.to_string(),
                    section,
                    field_id: path.clone(),
                    old_value: old,
                    new_value: new.clone(),
                }));
            }
        }
        Ok((stored.version, handles))
    }

    /// Value at a (possibly dotted) path as last written, preferring the
    /// field row over the section document.
    fn current_value_at(
        &self,
        funnel_id: &str,
        section: SectionId,
        path: &str,
    ) -> std::result::Result<Option<Value>, StoreError> {
        let (parent, child) = split_path(path);
        if let Some(field) = self.store.current_field(funnel_id, section, parent)? {
            return Ok(match child {
                Some(child) => get_path(&field.value, child).cloned(),
                None => Some(field.value),
            });
        }
        Ok(self
            .store
            .current_section(funnel_id, section)?
            .and_then(|s| get_path(&s.content, path).cloned()))
    }

    pub fn generation_attempts(&self, funnel_id: &str, section: SectionId) -> Result<Vec<AttemptRow>> {
        Ok(attempt_repo::list_for_section(
            self.store.database(),
            funnel_id,
            section.as_str(),
        )?)
    }

    // ─── Field writes & propagation ─────────────────────────────────────────

    /// Writes a field value. When an atomic field changes, propagation to
    /// downstream sections starts in the background.
    pub fn write_field(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        value: Value,
    ) -> Result<WriteOutcome> {
        let write = self.store.write_field(funnel_id, section, field_id, value)?;

        let mut changed = Vec::new();
        if let Some(old) = &write.previous {
            if self.propagation.should_propagate(section, field_id, old, &write.value) {
                changed.push((field_id.to_string(), old.clone(), write.value.clone()));
            }
        }
        let prefix = format!("{field_id}.");
        for path in self.graph.atomic_fields(section) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let old = write.previous.as_ref().and_then(|v| get_path(v, rest));
            let new = get_path(&write.value, rest);
            if let (Some(old), Some(new)) = (old, new) {
                if self.propagation.should_propagate(section, path, old, new) {
                    debug!(field_id = %path, "Parent write changed an atomic field");
                    changed.push((path.clone(), old.clone(), new.clone()));
                }
            }
        }

        let propagations = changed
            .into_iter()
            .map(|(path, old_value, new_value)| {
                self.propagation.spawn(PropagationRequest {
                    funnel_id: funnel_id.to_string(),
                    section,
                    field_id: path,
                    old_value,
                    new_value,
                })
            })
            .collect();

        Ok(WriteOutcome {
            write,
            propagations,
        })
    }

    /// Runs propagation synchronously. Always safe to call.
    pub fn propagate_atomic_change(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> PropagationReport {
        self.propagation
            .propagate_atomic_change(funnel_id, section, field_id, old_value, new_value)
    }

    pub fn subscribe_propagations(&self) -> broadcast::Receiver<PropagationEvent> {
        self.propagation.broadcaster().subscribe()
    }

    // ─── Jobs ───────────────────────────────────────────────────────────────

    /// Starts a background job regenerating `sections`.
    pub fn start_regeneration(
        &self,
        funnel_id: &str,
        sections: &[SectionId],
        mode: BatchMode,
        intake: IntakeAnswers,
    ) -> Result<JobHandle> {
        let runner = JobRunner::new(
            self.jobs.clone(),
            self.job_progress.clone(),
            Arc::new(self.clone()),
        );
        Ok(runner.start(funnel_id, sections, mode, intake)?)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<GenerationJob>> {
        Ok(self.jobs.find(job_id)?)
    }

    pub fn jobs_for_funnel(&self, funnel_id: &str, limit: Option<u64>) -> Result<Vec<GenerationJob>> {
        Ok(self.jobs.list_for_funnel(funnel_id, limit)?)
    }

    pub fn subscribe_job_progress(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.job_progress.subscribe()
    }

    // ─── Reads & approvals ──────────────────────────────────────────────────

    pub fn current_section(&self, funnel_id: &str, section: SectionId) -> Result<Option<StoredSection>> {
        Ok(self.store.current_section(funnel_id, section)?)
    }

    pub fn section_history(&self, funnel_id: &str, section: SectionId) -> Result<Vec<StoredSection>> {
        Ok(self.store.section_history(funnel_id, section)?)
    }

    pub fn current_fields(&self, funnel_id: &str, section: SectionId) -> Result<Vec<StoredField>> {
        Ok(self.store.current_fields(funnel_id, section)?)
    }

    pub fn approve_section(&self, funnel_id: &str, section: SectionId) -> Result<bool> {
        Ok(self.store.approve_section(funnel_id, section)?)
    }

    pub fn mark_needs_revision(&self, funnel_id: &str, section: SectionId) -> Result<bool> {
        Ok(self.store.mark_needs_revision(funnel_id, section)?)
    }

    pub fn approve_field(&self, funnel_id: &str, section: SectionId, field_id: &str) -> Result<bool> {
        Ok(self.store.approve_field(funnel_id, section, field_id)?)
    }
}

#[async_trait]
impl SectionTask for FunnelEngine {
    async fn run_section(
        &self,
        funnel_id: &str,
        section: SectionId,
        intake: &IntakeAnswers,
    ) -> std::result::Result<(), String> {
        match self.generate_section(funnel_id, section, intake).await {
            Ok(generated) if generated.outcome.is_generated() => Ok(()),
            Ok(generated) => Err(generated
                .outcome
                .error
                .unwrap_or_else(|| format!("{section} generation failed"))),
            Err(e) => Err(e.to_string()),
        }
    }
}
