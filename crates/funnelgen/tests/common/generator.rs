//! Scripted generation oracle.

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use funnelgen::generation::{GenerateOptions, GenerationError, Generator};

/// What the generator does when a marker matches.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return this text.
    Text(String),
    /// Fail with this error on every attempt.
    Fail(GenerationError),
    /// Never answer within any reasonable timeout.
    Hang,
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Text(value.to_string())
    }
}

/// Answers with the reply of the first rule whose marker occurs in the user
/// prompt. Unmatched prompts are rejected.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<(String, Reply)>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule. Later rules with the same marker replace earlier ones.
    pub fn on(&self, marker: &str, reply: Reply) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|(m, _)| m != marker);
        rules.push((marker.to_string(), reply));
        self
    }

    /// Every user prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of calls whose prompt contained `marker`.
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());

        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| user_prompt.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(GenerationError::Provider("woke up from hang".into()))
            }
            None => Err(GenerationError::Rejected("no scripted reply".into())),
        }
    }
}
