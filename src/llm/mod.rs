//! Inference clients
//!
//! Every agent node talks to the language model through `InferenceClient`.
//! Implementations are constructor-injected; nothing here is global.

use crate::config::RetryPolicy;
use crate::error::OrchestrationError;
use crate::retry::retry;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub mod openai;
pub use openai::ChatCompletionsClient;

/// One prompt in, one completion out
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;

    fn name(&self) -> &str {
        "inference"
    }
}

/// Wraps any client with the bounded retry policy
pub struct RetryingClient {
    inner: Arc<dyn InferenceClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn InferenceClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl InferenceClient for RetryingClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let inner = &self.inner;
        retry(&self.policy, inner.name(), || inner.complete(prompt, temperature)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Deterministic client for development and tests.
///
/// Rules are checked in insertion order; the first whose needle occurs in the
/// prompt supplies the completion. Prompts are recorded for assertions.
pub struct ScriptedInference {
    rules: Vec<(String, String)>,
    failures: Vec<String>,
    fallback: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            failures: Vec::new(),
            fallback: fallback.into(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rule(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), response.into()));
        self
    }

    /// Prompts containing `needle` fail with an inference error
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.failures.push(needle.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl Default for ScriptedInference {
    fn default() -> Self {
        Self::new("No scripted response available.")
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(needle) = self.failures.iter().find(|n| prompt.contains(n.as_str())) {
            return Err(OrchestrationError::InferenceFailure(format!(
                "scripted failure for '{}'",
                needle
            )));
        }

        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
