//! Atomic propagation: textual rename of short literal values (names,
//! prices, titles) across every downstream section, without regeneration.
//!
//! Each updated field or section document gets exactly one new version
//! through the versioned store, with a provenance entry appended under
//! `metadata.propagations`. The triggering section itself is never scanned.

mod events;
mod replace;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn};

use crate::config::PropagationConfig;
use crate::sections::{DependencyGraph, SectionId};
use crate::store::{
    append_provenance, FieldChange, FieldWriteOptions, SectionUpdate, VersionedStore,
};

pub use events::{PropagationBroadcaster, PropagationEvent};
pub use replace::Replacer;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("Background propagation task failed: {0}")]
    TaskFailed(String),
}

/// A change to an atomic field that should be propagated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationRequest {
    pub funnel_id: String,
    pub section: SectionId,
    pub field_id: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Which stored representations a run rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationScope {
    /// Granular field rows only.
    Fields,
    /// Whole section documents only.
    Sections,
    Both,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedField {
    pub section: SectionId,
    pub field_id: String,
    pub version: i64,
    pub replacements_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedSection {
    pub section: SectionId,
    pub version: i64,
    pub replacements_count: usize,
}

/// A downstream target that could not be updated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationFailure {
    pub section: Option<SectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    pub error: String,
}

/// Partial result of a propagation run: successes and per-target errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub funnel_id: String,
    pub source_section: SectionId,
    pub source_field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub updated_fields: Vec<UpdatedField>,
    pub updated_sections: Vec<UpdatedSection>,
    pub errors: Vec<PropagationFailure>,
}

impl PropagationReport {
    pub fn new(
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> Self {
        Self {
            funnel_id: funnel_id.to_string(),
            source_section: section,
            source_field: field_id.to_string(),
            old_value: old_value.clone(),
            new_value: new_value.clone(),
            updated_fields: Vec::new(),
            updated_sections: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn total_replacements(&self) -> usize {
        self.updated_fields
            .iter()
            .map(|f| f.replacements_count)
            .chain(self.updated_sections.iter().map(|s| s.replacements_count))
            .sum()
    }

    /// Nothing was written and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.updated_fields.is_empty() && self.updated_sections.is_empty() && self.errors.is_empty()
    }

    fn fail(&mut self, section: Option<SectionId>, field_id: Option<&str>, error: String) {
        self.errors.push(PropagationFailure {
            section,
            field_id: field_id.map(str::to_string),
            error,
        });
    }
}

/// Awaitable handle to a background propagation run.
pub struct PropagationHandle {
    inner: HandleInner,
}

enum HandleInner {
    Task(JoinHandle<PropagationReport>),
    Ready(PropagationReport),
}

impl PropagationHandle {
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            HandleInner::Task(handle) => handle.is_finished(),
            HandleInner::Ready(_) => true,
        }
    }

    pub async fn wait(self) -> Result<PropagationReport, PropagationError> {
        match self.inner {
            HandleInner::Task(handle) => handle
                .await
                .map_err(|e| PropagationError::TaskFailed(e.to_string())),
            HandleInner::Ready(report) => Ok(report),
        }
    }
}

/// Per-run state shared by the field and section passes.
struct Run<'a> {
    replacer: Replacer,
    source: String,
    old_text: String,
    new_text: String,
    downstream: &'a [SectionId],
}

impl Run<'_> {
    fn provenance(&self, replacements: usize) -> Value {
        json!({
            "timestamp": Utc::now().to_rfc3339(),
            "source": self.source,
            "replacedValue": self.old_text,
            "newValue": self.new_text,
            "replacementsCount": replacements,
        })
    }
}

#[derive(Clone)]
pub struct PropagationEngine {
    store: VersionedStore,
    graph: Arc<DependencyGraph>,
    settings: PropagationConfig,
    broadcaster: PropagationBroadcaster,
}

impl PropagationEngine {
    pub fn new(store: VersionedStore, graph: Arc<DependencyGraph>, settings: PropagationConfig) -> Self {
        Self {
            store,
            graph,
            settings,
            broadcaster: PropagationBroadcaster::default(),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: PropagationBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn broadcaster(&self) -> &PropagationBroadcaster {
        &self.broadcaster
    }

    /// Scope used by the automatic trigger.
    pub fn default_scope(&self) -> PropagationScope {
        if self.settings.section_documents {
            PropagationScope::Both
        } else {
            PropagationScope::Fields
        }
    }

    /// Whether a change to `field_id` in `section` would be propagated.
    pub fn should_propagate(
        &self,
        section: SectionId,
        field_id: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> bool {
        self.settings.enabled
            && old_value != new_value
            && self.graph.is_atomic_field(section, field_id)
    }

    /// Propagates an atomic field change to every downstream section.
    /// Always safe to call: non-atomic fields and equal values are no-ops.
    pub fn propagate_atomic_change(
        &self,
        funnel_id: &str,
        section: SectionId,
        field_id: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> PropagationReport {
        let request = PropagationRequest {
            funnel_id: funnel_id.to_string(),
            section,
            field_id: field_id.to_string(),
            old_value: old_value.clone(),
            new_value: new_value.clone(),
        };
        self.propagate(&request, self.default_scope())
    }

    pub fn propagate(&self, request: &PropagationRequest, scope: PropagationScope) -> PropagationReport {
        let _span = info_span!(
            "propagate",
            funnel_id = %request.funnel_id,
            section = %request.section,
            field_id = %request.field_id,
        )
        .entered();

        let mut report = PropagationReport::new(
            &request.funnel_id,
            request.section,
            &request.field_id,
            &request.old_value,
            &request.new_value,
        );

        if !self.should_propagate(
            request.section,
            &request.field_id,
            &request.old_value,
            &request.new_value,
        ) {
            debug!("Change is not propagated");
            return report;
        }

        let (Some(old_text), Some(new_text)) = (
            replace::literal_text(&request.old_value),
            replace::literal_text(&request.new_value),
        ) else {
            debug!("Only scalar values are propagated");
            return report;
        };

        let replacer = match Replacer::new(&old_text, &new_text) {
            Ok(Some(replacer)) => replacer,
            Ok(None) => return report,
            Err(e) => {
                report.fail(None, None, format!("Invalid replacement pattern: {e}"));
                return report;
            }
        };

        let run = Run {
            replacer,
            source: format!("{}.{}", request.section, request.field_id),
            old_text,
            new_text,
            downstream: self.graph.downstream_of(request.section),
        };

        if matches!(scope, PropagationScope::Fields | PropagationScope::Both) {
            self.propagate_to_fields(&request.funnel_id, &run, &mut report);
        }
        if matches!(scope, PropagationScope::Sections | PropagationScope::Both) {
            self.propagate_to_sections(&request.funnel_id, &run, &mut report);
        }

        info!(
            fields = report.updated_fields.len(),
            sections = report.updated_sections.len(),
            errors = report.errors.len(),
            "Propagated '{}' -> '{}' with {} replacements",
            run.old_text,
            run.new_text,
            report.total_replacements()
        );
        report
    }

    /// Runs [`propagate_atomic_change`](Self::propagate_atomic_change) as a
    /// detached task and publishes the report when it finishes. Without an
    /// async runtime the run happens inline.
    pub fn spawn(&self, request: PropagationRequest) -> PropagationHandle {
        let engine = self.clone();
        let inner = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => HandleInner::Task(runtime.spawn_blocking(move || engine.run(request))),
            Err(_) => {
                debug!("No async runtime, propagating inline");
                HandleInner::Ready(engine.run(request))
            }
        };
        PropagationHandle { inner }
    }

    fn run(&self, request: PropagationRequest) -> PropagationReport {
        let report = self.propagate(&request, self.default_scope());
        for failure in &report.errors {
            warn!(
                section = ?failure.section,
                field_id = ?failure.field_id,
                "Propagation target failed: {}",
                failure.error
            );
        }
        self.broadcaster.send(PropagationEvent::new(report.clone()));
        report
    }

    fn propagate_to_fields(&self, funnel_id: &str, run: &Run<'_>, report: &mut PropagationReport) {
        if run.downstream.is_empty() {
            return;
        }

        let fields = match self.store.current_fields_in(funnel_id, run.downstream) {
            Ok(fields) => fields,
            Err(e) => {
                report.fail(None, None, format!("Could not load downstream fields: {e}"));
                return;
            }
        };

        for field in fields {
            if run.replacer.replace_value(&field.value).1 == 0 {
                continue;
            }

            let mut applied = 0;
            let result = self.store.modify_field(
                funnel_id,
                field.section,
                &field.field_id,
                FieldWriteOptions::default(),
                |current| {
                    let Some(current) = current else {
                        return Ok(None);
                    };
                    let (replaced, count) = run.replacer.replace_value(current);
                    applied = count;
                    if count == 0 {
                        return Ok(None);
                    }
                    Ok(Some(FieldChange::new(replaced).with_provenance(run.provenance(count))))
                },
            );

            match result {
                Ok(Some(write)) => {
                    debug!(section = %field.section, field_id = %field.field_id, version = write.version, "Field updated");
                    report.updated_fields.push(UpdatedField {
                        section: field.section,
                        field_id: field.field_id,
                        version: write.version,
                        replacements_count: applied,
                    });
                }
                Ok(None) => {}
                Err(e) => report.fail(Some(field.section), Some(&field.field_id), e.to_string()),
            }
        }
    }

    fn propagate_to_sections(&self, funnel_id: &str, run: &Run<'_>, report: &mut PropagationReport) {
        for &target in run.downstream {
            let mut applied = 0;
            let result = self.store.modify_section(funnel_id, target, |current| {
                let Some(current) = current else {
                    return Ok(None);
                };
                let (content, count) = run.replacer.replace_value(&current.content);
                applied = count;
                if count == 0 {
                    return Ok(None);
                }
                Ok(Some(SectionUpdate {
                    content,
                    status: current.status,
                    metadata: Some(append_provenance(
                        current.metadata.clone(),
                        run.provenance(count),
                    )),
                }))
            });

            match result {
                Ok(Some(stored)) => report.updated_sections.push(UpdatedSection {
                    section: target,
                    version: stored.version,
                    replacements_count: applied,
                }),
                Ok(None) => {}
                Err(e) => report.fail(Some(target), None, e.to_string()),
            }
        }
    }
}
