//! Model Registry
//!
//! Holds the active upstream model identity and credentials. The registry is
//! created once at startup and shared as an `Arc<ModelRegistry>` with every
//! component that needs to know which model is live.
//!
//! # Switching
//!
//! [`ModelRegistry::switch_model`] replaces the active model id for the whole
//! process. There is no per-request pinning: a request that reads
//! [`ModelRegistry::current`] just before a switch uses the old model, one
//! that reads it just after uses the new one. Last write wins.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Url;

/// Upstream API credential
///
/// `Debug` output is redacted so keys never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building the authorization header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Snapshot of the active upstream model configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    /// Provider model identifier (e.g. "qwen-plus")
    pub model_id: String,
    /// Base URL of the OpenAI-compatible API
    pub endpoint: Url,
    /// Bearer credential
    pub api_key: ApiKey,
    /// Temperature used when a request does not override it
    pub default_temperature: f32,
    /// Max tokens used when a request does not override it
    pub default_max_tokens: u32,
}

impl ModelConfig {
    /// Full URL of the chat completions endpoint
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.as_str().trim_end_matches('/')
        )
    }
}

/// Process-wide, switchable model configuration
#[derive(Debug)]
pub struct ModelRegistry {
    endpoint: Url,
    api_key: ApiKey,
    default_temperature: f32,
    default_max_tokens: u32,
    model_id: RwLock<Arc<str>>,
}

impl ModelRegistry {
    /// Create a registry from the startup configuration
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        Self {
            endpoint: config.endpoint,
            api_key: config.api_key,
            default_temperature: config.default_temperature,
            default_max_tokens: config.default_max_tokens,
            model_id: RwLock::new(Arc::from(config.model_id)),
        }
    }

    /// Create a shared registry handle
    #[must_use]
    pub fn shared(config: ModelConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Consistent snapshot of the active configuration
    #[must_use]
    pub fn current(&self) -> ModelConfig {
        ModelConfig {
            model_id: self.model_id.read().to_string(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            default_temperature: self.default_temperature,
            default_max_tokens: self.default_max_tokens,
        }
    }

    /// The active model id
    #[must_use]
    pub fn model_id(&self) -> Arc<str> {
        Arc::clone(&*self.model_id.read())
    }

    /// Replace the active model id
    ///
    /// Surrounding whitespace is stripped. Returns `false` (and leaves the
    /// active id unchanged) when `model_id` is blank. Reachability of the new model is not checked here; a bad id
    /// surfaces on the next upstream call.
    pub fn switch_model(&self, model_id: &str) -> bool {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            tracing::warn!("Rejected model switch to an empty model id");
            return false;
        }

        let previous = std::mem::replace(&mut *self.model_id.write(), Arc::from(model_id));
        tracing::info!(from = %previous, to = %model_id, "Switched AI model");
        true
    }
}
