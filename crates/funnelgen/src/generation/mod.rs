//! Section generation: the oracle contract, retry policy, output parsing,
//! prompt assembly and the single-shot/chunked pipeline.

pub mod client;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod retry;

pub use client::{GenerateOptions, Generator};
pub use error::{GenerationError, ParseError};
pub use parse::{parse_document, parse_structured};
pub use pipeline::{GenerationPipeline, SectionOutcome};
pub use prompt::{Prompt, PromptBuilder};
pub use retry::RetryPolicy;
