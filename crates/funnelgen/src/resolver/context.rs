//! Context objects handed to prompt assembly.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sections::{SectionDescriptor, SectionId};

use super::extract::flatten_text;

/// Raw intake answers collected before any section exists. Used to
/// synthesize stand-in content for upstream sections that are missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntakeAnswers(BTreeMap<String, Value>);

impl IntakeAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First non-blank answer among `keys`, flattened to text.
    pub fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .map(flatten_text)
            .find(|text| !text.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for IntakeAnswers {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Shaped values pulled out of upstream content. Empty strings mean the
/// value could not be found anywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextSummary {
    pub ideal_client: String,
    pub demographics: String,
    pub challenges: String,
    pub desires: String,
    pub one_line_message: String,
    pub signature_method_name: String,
    pub core_message: String,
    pub story_summary: String,
    pub free_gift_name: String,
    pub offer_name: String,
    pub program_name: String,
    pub offer_pricing: String,
}

impl ContextSummary {
    /// Labelled values in a fixed order. Blank values are skipped.
    pub fn lines(&self) -> Vec<(&'static str, &str)> {
        [
            ("Ideal client", self.ideal_client.as_str()),
            ("Demographics", self.demographics.as_str()),
            ("Challenges", self.challenges.as_str()),
            ("Desires", self.desires.as_str()),
            ("One-line message", self.one_line_message.as_str()),
            ("Signature method", self.signature_method_name.as_str()),
            ("Core message", self.core_message.as_str()),
            ("Story", self.story_summary.as_str()),
            ("Free gift", self.free_gift_name.as_str()),
            ("Offer", self.offer_name.as_str()),
            ("Program", self.program_name.as_str()),
            ("Pricing", self.offer_pricing.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }
}

/// Upstream context for generating one section.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedContext {
    pub funnel_id: String,
    pub target: SectionId,
    /// Upstream documents, real or synthesized, in generation order.
    pub sections: BTreeMap<SectionId, Value>,
    /// Upstream sections that had no usable stored content.
    pub missing: Vec<SectionId>,
    pub summary: ContextSummary,
    pub intake: IntakeAnswers,
}

impl ResolvedContext {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn section(&self, section: SectionId) -> Option<&Value> {
        self.sections.get(&section)
    }

    /// Renders the context as a prompt block. Output is deterministic.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();

        let lines = self.summary.lines();
        if !lines.is_empty() {
            out.push_str("## Business context\n");
            for (label, value) in lines {
                let _ = writeln!(out, "{}: {}", label, value);
            }
            out.push('\n');
        }

        for (section, content) in &self.sections {
            let descriptor = SectionDescriptor::for_section(*section);
            let _ = writeln!(out, "## {} ({})", descriptor.title, section);
            if self.missing.contains(section) {
                out.push_str("(not generated yet; built from intake answers)\n");
            }
            let rendered = serde_json::to_string_pretty(content).unwrap_or_default();
            out.push_str(&rendered);
            out.push_str("\n\n");
        }

        if !self.intake.is_empty() {
            out.push_str("## Intake answers\n");
            for (key, value) in self.intake.iter() {
                let text = flatten_text(value);
                if !text.is_empty() {
                    let _ = writeln!(out, "{}: {}", key, text);
                }
            }
        }

        out.trim_end().to_string()
    }
}

/// Flat aggregate of every core section, injected into non-core prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoreContext {
    pub funnel_id: String,
    pub summary: ContextSummary,
    pub missing: Vec<SectionId>,
}

/// Renders a core context as a stable, human-readable block.
pub fn format_context_for_prompt(context: &CoreContext) -> String {
    let lines = context.summary.lines();
    if lines.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Core business context\n");
    for (label, value) in lines {
        let _ = writeln!(out, "- {}: {}", label, value);
    }
    out.trim_end().to_string()
}
