//! Chat-completions client for OpenAI-compatible endpoints
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::InferenceClient;
use crate::config::LlmConfig;
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const SYSTEM_PROMPT: &str = "You are a careful financial analysis assistant. \
Use only the data provided in the prompt. Be structured and concise. \
Never invent tickers, prices or holdings.";

/// Reusable chat client (connection-pooled)
pub struct ChatCompletionsClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(OrchestrationError::Configuration(
                "LLM_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl InferenceClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling inference endpoint");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Inference request failed: {}", e);
                OrchestrationError::InferenceFailure(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Inference endpoint returned an error");
            let detail = format!("endpoint returned {}: {}", status, truncate(&error_text, 200));
            // Client errors will not improve on retry
            return Err(if status.is_client_error() && status.as_u16() != 429 {
                OrchestrationError::MalformedResponse(detail)
            } else {
                OrchestrationError::InferenceFailure(detail)
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse inference response: {}", e);
            OrchestrationError::MalformedResponse(format!("unexpected response shape: {}", e))
        })?;

        extract_answer(body)
    }

    fn name(&self) -> &str {
        "chat_completions"
    }
}

fn extract_answer(body: ChatResponse) -> Result<String> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        OrchestrationError::MalformedResponse("no choices in completion".to_string())
    })?;

    if let Some(reason) = choice.finish_reason.as_deref() {
        if reason == "length" {
            debug!("Completion truncated at max_tokens");
        }
    }

    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| OrchestrationError::InferenceFailure("empty completion".to_string()))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
