//! Upstream context resolution.
//!
//! The resolver never fails its caller. Missing upstream sections (and
//! store errors while reading them) degrade to intake-based stand-ins and
//! are reported in [`ResolvedContext::missing`].

mod context;
mod extract;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info_span, warn};

use crate::config::ContextConfig;
use crate::sections::{DependencyGraph, SectionId, SectionStatus};
use crate::store::{StoredField, VersionedStore};

pub use context::{
    format_context_for_prompt, ContextSummary, CoreContext, IntakeAnswers, ResolvedContext,
};
pub(crate) use extract::flatten_text;

/// Granular field rows checked when no lead magnet document has a title.
const FREE_GIFT_FIELDS: &[&str] = &["title", "leadMagnetTitle", "freeGiftName"];

#[derive(Clone)]
pub struct DependencyResolver {
    store: VersionedStore,
    graph: Arc<DependencyGraph>,
    settings: ContextConfig,
}

impl DependencyResolver {
    pub fn new(store: VersionedStore, graph: Arc<DependencyGraph>, settings: ContextConfig) -> Self {
        Self {
            store,
            graph,
            settings,
        }
    }

    /// Whether `section` counts as a core section.
    pub fn is_core(&self, section: SectionId) -> bool {
        section.numeric_key() <= self.settings.core_context_threshold
    }

    /// Resolves every upstream section of `target` into prompt-ready
    /// context.
    pub fn resolve(
        &self,
        funnel_id: &str,
        target: SectionId,
        intake: &IntakeAnswers,
    ) -> ResolvedContext {
        let _span = info_span!("resolve", funnel_id = %funnel_id, section = %target).entered();

        let upstream = self.graph.upstream_of(target);
        let (sections, missing) = self.load_sections(funnel_id, upstream, intake);
        let mut summary = extract::summarize(&sections);

        if summary.free_gift_name.is_empty() && upstream.contains(&SectionId::LeadMagnet) {
            summary.free_gift_name = self.free_gift_from_fields(funnel_id, intake);
        }

        if !missing.is_empty() {
            debug!(
                missing = ?missing,
                "Resolved {} with {} of {} upstream sections missing",
                target,
                missing.len(),
                upstream.len()
            );
        }

        ResolvedContext {
            funnel_id: funnel_id.to_string(),
            target,
            sections,
            missing,
            summary,
            intake: intake.clone(),
        }
    }

    /// Aggregates every core section into one flat context.
    pub fn build_core_context(&self, funnel_id: &str, intake: &IntakeAnswers) -> CoreContext {
        let _span = info_span!("build_core_context", funnel_id = %funnel_id).entered();

        let core: Vec<SectionId> = SectionId::ALL
            .iter()
            .copied()
            .filter(|s| self.is_core(*s))
            .collect();
        let (sections, missing) = self.load_sections(funnel_id, &core, intake);

        CoreContext {
            funnel_id: funnel_id.to_string(),
            summary: extract::summarize(&sections),
            missing,
        }
    }

    fn load_sections(
        &self,
        funnel_id: &str,
        wanted: &[SectionId],
        intake: &IntakeAnswers,
    ) -> (BTreeMap<SectionId, Value>, Vec<SectionId>) {
        let mut fields_by_section: BTreeMap<SectionId, Vec<StoredField>> = BTreeMap::new();
        match self.store.current_fields_in(funnel_id, wanted) {
            Ok(fields) => {
                for field in fields {
                    fields_by_section.entry(field.section).or_default().push(field);
                }
            }
            Err(e) => warn!("Could not load field values for funnel {}: {}", funnel_id, e),
        }

        let mut sections = BTreeMap::new();
        let mut missing = Vec::new();

        for section in wanted {
            let stored = match self.store.current_section(funnel_id, *section) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Could not load {} for funnel {}: {}", section, funnel_id, e);
                    None
                }
            };

            let usable = stored.filter(|s| {
                s.status != SectionStatus::Failed
                    && (!self.settings.require_approved || s.status == SectionStatus::Approved)
            });

            match usable {
                Some(stored) => {
                    let mut content = stored.content;
                    if let Some(fields) = fields_by_section.get(section) {
                        overlay_fields(&mut content, fields, stored.created_at);
                    }
                    sections.insert(*section, content);
                }
                None => {
                    sections.insert(*section, extract::fallback_content(*section, intake));
                    missing.push(*section);
                }
            }
        }

        (sections, missing)
    }

    fn free_gift_from_fields(&self, funnel_id: &str, intake: &IntakeAnswers) -> String {
        for field_id in FREE_GIFT_FIELDS {
            match self
                .store
                .current_field(funnel_id, SectionId::LeadMagnet, field_id)
            {
                Ok(Some(field)) => {
                    let text = flatten_text(&field.value);
                    if !text.is_empty() {
                        return text;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Free gift field lookup failed for funnel {}: {}", funnel_id, e);
                    break;
                }
            }
        }
        intake
            .first_text(&["freeGift", "leadMagnet"])
            .unwrap_or_default()
    }
}

/// Applies field rows written after the document on top of it. Older rows
/// are either already reflected in the document or stale.
fn overlay_fields(
    content: &mut Value,
    fields: &[StoredField],
    section_written: chrono::DateTime<chrono::Utc>,
) {
    let Value::Object(map) = content else {
        return;
    };
    for field in fields {
        if field.created_at >= section_written {
            map.insert(field.field_id.clone(), field.value.clone());
        }
    }
}
