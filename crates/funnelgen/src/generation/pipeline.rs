use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::resolver::{CoreContext, ResolvedContext};
use crate::sections::{SectionDescriptor, SectionId, SectionStatus};

use super::client::{GenerateOptions, Generator};
use super::error::GenerationError;
use super::parse::parse_document;
use super::prompt::{Prompt, PromptBuilder};
use super::retry::RetryPolicy;

/// Result of generating one section. Never persisted by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct SectionOutcome {
    pub section: SectionId,
    /// `None` when the section failed outright.
    pub content: Option<Value>,
    /// `Generated` or `Failed`.
    pub status: SectionStatus,
    pub error: Option<String>,
    /// Names of chunks that were replaced by empty placeholders.
    pub failed_chunks: Vec<String>,
    /// Validation warnings for the merged content.
    pub issues: Vec<String>,
}

impl SectionOutcome {
    fn generated(section: SectionId, content: Value, failed_chunks: Vec<String>, issues: Vec<String>) -> Self {
        Self {
            section,
            content: Some(content),
            status: SectionStatus::Generated,
            error: None,
            failed_chunks,
            issues,
        }
    }

    fn failed(section: SectionId, error: String, failed_chunks: Vec<String>) -> Self {
        Self {
            section,
            content: None,
            status: SectionStatus::Failed,
            error: Some(error),
            failed_chunks,
            issues: Vec::new(),
        }
    }

    pub fn is_generated(&self) -> bool {
        self.status == SectionStatus::Generated
    }
}

pub struct GenerationPipeline {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    options: GenerateOptions,
    prompts: PromptBuilder,
}

impl GenerationPipeline {
    pub fn new(
        generator: Arc<dyn Generator>,
        retry: RetryPolicy,
        options: GenerateOptions,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            generator,
            retry,
            options,
            prompts,
        }
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Generates `section` from resolved context. Single-shot sections fail
    /// on malformed output; chunked sections tolerate failed chunks.
    pub async fn generate(
        &self,
        section: SectionId,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> SectionOutcome {
        let descriptor = SectionDescriptor::for_section(section);
        let span = info_span!(
            "generate_section",
            funnel_id = %context.funnel_id,
            section = %section,
            chunks = descriptor.chunks.len(),
        );

        async move {
            if descriptor.is_chunked() {
                self.generate_chunked(descriptor, context, core).await
            } else {
                self.generate_single(descriptor, context, core).await
            }
        }
        .instrument(span)
        .await
    }

    async fn generate_single(
        &self,
        descriptor: &'static SectionDescriptor,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> SectionOutcome {
        let prompt = self.prompts.section_prompt(descriptor, context, core);
        let result = self
            .call(&prompt, descriptor.id.as_str())
            .await
            .and_then(|text| parse_document(&text).map_err(GenerationError::from));

        match result {
            Ok(content) => {
                let report = descriptor.validate(&content);
                if !report.valid {
                    warn!(issues = ?report.issues, "Generated content failed validation");
                }
                info!("Section generated");
                SectionOutcome::generated(descriptor.id, content, Vec::new(), report.issues)
            }
            Err(e) => {
                error!("Section generation failed: {}", e);
                SectionOutcome::failed(descriptor.id, e.to_string(), Vec::new())
            }
        }
    }

    async fn generate_chunked(
        &self,
        descriptor: &'static SectionDescriptor,
        context: &ResolvedContext,
        core: Option<&CoreContext>,
    ) -> SectionOutcome {
        let calls = descriptor.chunks.iter().enumerate().map(|(index, chunk)| {
            let prompt = self.prompts.chunk_prompt(descriptor, index, context, core);
            let label = format!("{} {}", descriptor.id, chunk.name);
            async move {
                let result = self
                    .call(&prompt, &label)
                    .await
                    .and_then(|text| parse_document(&text).map_err(GenerationError::from));
                (chunk, result)
            }
            .instrument(info_span!("chunk", index = index + 1, name = chunk.name))
        });

        // All-settled: every chunk runs to completion regardless of the others.
        let results = join_all(calls).await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut failed_chunks = Vec::new();
        let mut last_error = None;
        for (chunk, result) in results {
            match result {
                Ok(value) => {
                    debug!(chunk = chunk.name, "Chunk generated");
                    outputs.push(Some(value));
                }
                Err(e) => {
                    warn!(chunk = chunk.name, "Chunk failed, using empty placeholder: {}", e);
                    failed_chunks.push(chunk.name.to_string());
                    last_error = Some(e);
                    outputs.push(None);
                }
            }
        }

        if failed_chunks.len() == descriptor.chunks.len() {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no chunk output".to_string());
            error!("All {} chunks failed", descriptor.chunks.len());
            return SectionOutcome::failed(
                descriptor.id,
                format!("all {} chunks failed; last error: {}", failed_chunks.len(), reason),
                failed_chunks,
            );
        }

        let content = descriptor.merge(&outputs);
        let report = descriptor.validate(&content);
        if !report.valid {
            warn!(
                issues = ?report.issues,
                failed_chunks = ?failed_chunks,
                "Merged content failed validation, keeping partial result"
            );
        }
        info!(
            "Section generated from {}/{} chunks",
            descriptor.chunks.len() - failed_chunks.len(),
            descriptor.chunks.len()
        );
        SectionOutcome::generated(descriptor.id, content, failed_chunks, report.issues)
    }

    async fn call(&self, prompt: &Prompt, label: &str) -> Result<String, GenerationError> {
        let generator = &self.generator;
        let options = &self.options;
        self.retry
            .run(label, options.timeout, move || async move {
                let text = generator
                    .generate(&prompt.system, &prompt.user, options)
                    .await?;
                if text.trim().is_empty() {
                    return Err(GenerationError::EmptyResponse);
                }
                Ok(text)
            })
            .await
    }
}
