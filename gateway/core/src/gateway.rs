//! Chat Gateway Service
//!
//! The request-facing surface of the core: takes an inbound [`ChatRequest`],
//! normalizes it and either returns the whole reply or opens a paced
//! streaming session. Transport layers (HTTP, SSE, CLI) sit on top of this
//! and only translate.
//!
//! ```text
//!   ChatRequest ──► Normalizer ──► Conversation ─┬─► ChatBackend ──► ChatReply
//!                                                │
//!                                                └─► StreamManager ──► SessionHandle
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{ChatBackend, OpenAiCompatBackend};
use crate::config::GatewayConfig;
use crate::error::{ApiError, ApiResponse, GatewayError};
use crate::messages::{Conversation, GenerationParams, Normalizer, RawTurn, Role};
use crate::registry::{ModelConfig, ModelRegistry};
use crate::streaming::{
    SessionHandle, StreamManager, StreamManagerConfig, StreamRegisterError, StreamStats,
};

/// Message returned when a model switch is rejected
pub const SWITCH_FAILED_MESSAGE: &str = "Failed to switch model";

// ============================================================================
// Request / Reply
// ============================================================================

/// Inbound chat request
///
/// Every field is optional on the wire; missing or null `messages` is treated
/// as an empty list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation history, oldest first
    #[serde(default)]
    pub messages: Option<Vec<RawTurn>>,

    /// Model requested by the client (informational; see [`ChatGateway::switch_model`])
    #[serde(default)]
    pub model: Option<String>,

    /// Sampling temperature override
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Reply length override
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Deep thinking mode
    #[serde(default)]
    pub deep_thinking: Option<bool>,
}

impl ChatRequest {
    /// Request with the given messages and no overrides
    #[must_use]
    pub fn new(messages: Vec<RawTurn>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::default()
        }
    }

    /// Parse a JSON body
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if the body is not a valid request.
    pub fn from_json(body: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(body)
            .map_err(|e| GatewayError::Validation(format!("malformed request body: {e}")))
    }

    /// Generation parameters carried by this request
    #[must_use]
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            deep_thinking: self.deep_thinking.unwrap_or(false),
        }
    }

    /// Validate parameters and normalize the messages
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for out-of-range parameters.
    pub fn conversation(&self, normalizer: &Normalizer) -> Result<Conversation, GatewayError> {
        let params = self.params();
        params.validate().map_err(GatewayError::Validation)?;

        if let Some(ref model) = self.model {
            tracing::debug!(requested = %model, "Request names a model, using the active one");
        }

        Ok(normalizer
            .normalize(self.messages.as_deref())
            .with_params(params))
    }
}

/// Non-streaming reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Always [`Role::Assistant`]
    pub role: Role,
    /// Full reply text
    pub content: String,
}

impl ChatReply {
    /// Assistant reply with the given content
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<StreamRegisterError> for ApiError {
    fn from(err: StreamRegisterError) -> Self {
        match err {
            StreamRegisterError::MaxStreamsReached => ApiError::new(503, err.to_string()),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Chat gateway service
pub struct ChatGateway {
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn ChatBackend>,
    normalizer: Normalizer,
    streams: StreamManager,
}

impl ChatGateway {
    /// Assemble a gateway from its parts
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn ChatBackend>,
        normalizer: Normalizer,
        streams: StreamManagerConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            normalizer,
            streams: StreamManager::with_config(streams),
        }
    }

    /// Build a gateway talking to the configured OpenAI-compatible provider
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the upstream settings are invalid
    /// or the HTTP client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let model = config
            .model_config()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let registry = ModelRegistry::shared(model);
        let backend = OpenAiCompatBackend::new(Arc::clone(&registry), config.request_timeout)
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        tracing::info!(
            model = %registry.model_id(),
            endpoint = %config.endpoint,
            "Chat gateway ready"
        );

        Ok(Self::new(
            registry,
            Arc::new(backend),
            config.normalizer(),
            config.stream_manager_config(),
        ))
    }

    /// The shared model registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The stream manager
    #[must_use]
    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    /// Streaming statistics
    #[must_use]
    pub fn stream_stats(&self) -> StreamStats {
        self.streams.stats()
    }

    /// Answer a request with the complete reply
    ///
    /// # Errors
    ///
    /// Returns a 400 [`ApiError`] for invalid requests and a 502 carrying the
    /// apology message when the upstream call fails.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
        let conversation = request.conversation(&self.normalizer)?;

        tracing::info!(
            backend = self.backend.name(),
            turns = conversation.len(),
            deep_thinking = conversation.params.deep_thinking,
            "Chat request"
        );

        match self.backend.complete(&conversation).await {
            Ok(completion) => {
                tracing::info!(
                    model = %completion.model,
                    duration_ms = u64::try_from(completion.duration.as_millis()).unwrap_or(u64::MAX),
                    "Chat reply ready"
                );
                Ok(ChatReply::assistant(completion.content))
            }
            Err(e) => {
                tracing::error!(error = %e, "Chat request failed");
                Err(GatewayError::Upstream(e).into())
            }
        }
    }

    /// Open a paced streaming session for a request
    ///
    /// # Errors
    ///
    /// Returns a 400 [`ApiError`] for invalid requests and a 503 when the
    /// concurrent session limit is reached. Upstream failures are reported
    /// in-band as a single apology fragment.
    pub fn stream_chat(&self, request: &ChatRequest) -> Result<SessionHandle, ApiError> {
        let conversation = request.conversation(&self.normalizer)?;

        tracing::info!(
            backend = self.backend.name(),
            turns = conversation.len(),
            deep_thinking = conversation.params.deep_thinking,
            "Streaming chat request"
        );

        Ok(self.streams.open(Arc::clone(&self.backend), conversation)?)
    }

    /// Switch the active model for every subsequent request
    pub fn switch_model(&self, model_id: &str) -> ApiResponse<bool> {
        if self.registry.switch_model(model_id) {
            ApiResponse::success(true)
        } else {
            ApiResponse::error(500, SWITCH_FAILED_MESSAGE)
        }
    }

    /// Snapshot of the active model configuration
    #[must_use]
    pub fn current_model(&self) -> ModelConfig {
        self.registry.current()
    }

    /// Whether the upstream provider is reachable
    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }
}

// ============================================================================
// Tests
// ============================================================================
