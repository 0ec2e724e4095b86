//! The generation oracle contract.

use std::time::Duration;

use async_trait::async_trait;

use super::error::GenerationError;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Ask the provider for a JSON-only response.
    pub json_mode: bool,
    pub max_tokens: u32,
    /// Per-call timeout. Applied by the caller around every attempt.
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            json_mode: true,
            max_tokens: 4096,
            timeout: Duration::from_secs(90),
            temperature: 0.7,
        }
    }
}

/// A black-box text generator (usually a hosted language model).
///
/// Implementations return the raw response text. Transport concerns such as
/// authentication and wire format belong to the implementation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, GenerationError>;
}
