//! OpenAI-Compatible Backend Implementation
//!
//! Talks to any provider exposing the OpenAI chat completions schema
//! (DashScope compatible mode, vLLM, llama.cpp server, ...).
//!
//! # Provider API
//!
//! - `POST {endpoint}/chat/completions` with `Authorization: Bearer {key}`
//!   and body `{model, messages: [{role, content}], temperature, max_tokens}`
//! - Reply `{choices: [{message: {content}}]}`
//! - `GET {endpoint}/models` is used for health checks
//!
//! The active model, endpoint and key are read from the shared
//! [`ModelRegistry`] on every call, so a model switch applies to the next
//! request without rebuilding the backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{ChatBackend, Completion, UpstreamError};
use crate::messages::Conversation;
use crate::registry::{ModelConfig, ModelRegistry};

/// Longest upstream error body kept in an [`UpstreamError::Status`]
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Build the provider request body for a conversation
///
/// Request overrides win; otherwise the model defaults apply.
fn build_request<'a>(config: &'a ModelConfig, conversation: &'a Conversation) -> CompletionRequest<'a> {
    CompletionRequest {
        model: &config.model_id,
        messages: conversation
            .turns
            .iter()
            .map(|t| WireMessage {
                role: t.role.as_str(),
                content: &t.content,
            })
            .collect(),
        temperature: conversation
            .params
            .temperature
            .unwrap_or(config.default_temperature),
        max_tokens: conversation
            .params
            .max_tokens
            .unwrap_or(config.default_max_tokens),
    }
}

/// Extract `choices[0].message.content` from a provider reply body
pub(crate) fn parse_completion(body: &str) -> Result<String, UpstreamError> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| UpstreamError::Decode(e.to_string()))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(UpstreamError::EmptyChoices)?;

    choice
        .message
        .and_then(|m| m.content)
        .ok_or(UpstreamError::MissingContent)
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

fn classify(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Network(err.to_string())
    }
}

/// OpenAI-compatible chat backend
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    /// Shared active model configuration
    registry: Arc<ModelRegistry>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a backend with the given per-request timeout
    pub fn new(registry: Arc<ModelRegistry>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            registry,
            http_client,
        })
    }

    /// Create a backend around an existing HTTP client
    #[must_use]
    pub fn with_client(registry: Arc<ModelRegistry>, http_client: reqwest::Client) -> Self {
        Self {
            registry,
            http_client,
        }
    }

    /// The registry this backend resolves models from
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, conversation: &Conversation) -> Result<Completion, UpstreamError> {
        let start = Instant::now();
        let config = self.registry.current();
        let url = config.completions_url();
        let body = build_request(&config, conversation);

        tracing::debug!(
            url = %url,
            model = %config.model_id,
            turns = conversation.len(),
            temperature = body.temperature,
            max_tokens = body.max_tokens,
            deep_thinking = conversation.params.deep_thinking,
            "Sending completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(config.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify(&e))?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: truncate_body(text),
            });
        }

        let content = parse_completion(&text)?;
        let duration = start.elapsed();

        tracing::info!(
            model = %config.model_id,
            chars = content.chars().count(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Received completion"
        );

        Ok(Completion {
            content,
            model: config.model_id,
            duration,
        })
    }

    async fn health_check(&self) -> bool {
        let config = self.registry.current();
        let url = format!("{}/models", config.endpoint.as_str().trim_end_matches('/'));

        self.http_client
            .get(url)
            .bearer_auth(config.api_key.expose())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
