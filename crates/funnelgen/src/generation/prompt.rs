use std::fmt::Write as _;

use crate::resolver::{format_context_for_prompt, CoreContext, ResolvedContext};
use crate::sections::{SectionDescriptor, SectionId};

/// System and user prompt for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    core_context_threshold: u32,
}

impl PromptBuilder {
    pub fn new(core_context_threshold: u32) -> Self {
        Self {
            core_context_threshold,
        }
    }

    /// Non-core sections get the core context block.
    pub fn includes_core_context(&self, section: SectionId) -> bool {
        section.numeric_key() > self.core_context_threshold
    }

    pub fn section_prompt(
        &self,
        descriptor: &SectionDescriptor,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> Prompt {
        let mut user = self.context_blocks(descriptor.id, context, core);
        let _ = write!(
            user,
            "Write the {} section. Respond with one JSON object containing the keys: {}.",
            descriptor.title,
            descriptor.required_keys.join(", ")
        );
        Prompt {
            system: system_prompt(descriptor),
            user,
        }
    }

    /// Prompt for chunk `index` of a chunked section.
    pub fn chunk_prompt(
        &self,
        descriptor: &SectionDescriptor,
        index: usize,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> Prompt {
        let mut user = self.context_blocks(descriptor.id, context, core);
        if let Some(chunk) = descriptor.chunks.get(index) {
            let _ = write!(
                user,
                "This is chunk {} of {} ({}) of the {} section. {} \
                 Respond with one JSON object containing exactly the keys: {}.",
                index + 1,
                descriptor.chunks.len(),
                chunk.name,
                descriptor.title,
                chunk.instructions,
                chunk.keys.join(", ")
            );
        }
        Prompt {
            system: system_prompt(descriptor),
            user,
        }
    }

    fn context_blocks(
        &self,
        section: SectionId,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> String {
        let mut out = String::new();
        if self.includes_core_context(section) {
            if let Some(core) = core {
                let block = format_context_for_prompt(core);
                if !block.is_empty() {
                    out.push_str(&block);
                    out.push_str("\n\n");
                }
            }
        }
        let resolved = context.format_for_prompt();
        if !resolved.is_empty() {
            out.push_str(&resolved);
            out.push_str("\n\n");
        }
        out
    }
}

fn system_prompt(descriptor: &SectionDescriptor) -> String {
    format!(
        "{} Always answer with valid JSON only, no commentary.",
        descriptor.role
    )
}
