use std::time::Duration;

use thiserror::Error;

/// Malformed generation output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed generation output: {reason} (output began with {excerpt:?})")]
pub struct ParseError {
    pub reason: String,
    pub excerpt: String,
}

impl ParseError {
    pub(crate) fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: raw.chars().take(80).collect(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("Generation call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation provider error: {0}")]
    Provider(String),

    #[error("Generation provider returned an empty response")]
    EmptyResponse,

    /// The provider rejected the request itself (bad key, bad prompt).
    #[error("Generation request rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl GenerationError {
    /// Timeouts, provider hiccups and empty responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::Timeout(_) | GenerationError::Provider(_) | GenerationError::EmptyResponse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(GenerationError::Provider("503".into()).is_transient());
        assert!(GenerationError::EmptyResponse.is_transient());
        assert!(!GenerationError::Rejected("401".into()).is_transient());
        assert!(!GenerationError::Parse(ParseError::new("bad", "x")).is_transient());
    }

    #[test]
    fn test_parse_error_excerpt_is_bounded() {
        let raw = "x".repeat(500);
        let err = ParseError::new("not json", &raw);
        assert_eq!(err.excerpt.len(), 80);
    }
}
