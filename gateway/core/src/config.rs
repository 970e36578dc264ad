//! TOML Configuration File Support
//!
//! Centralized configuration loading for the gateway, supporting a TOML file at
//! `~/.config/chat-gateway/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [upstream]
//! endpoint = "https://dashscope.aliyuncs.com/compatible-mode/v1"
//! api_key = "sk-..."
//! model_id = "qwen-plus"
//! temperature = 0.7
//! max_tokens = 2048
//! request_timeout_secs = 120
//!
//! [streaming]
//! session_timeout_secs = 180
//! channel_capacity = 64
//! max_concurrent_sessions = 64
//! base_delay_ms = 15
//! punctuation_delay_ms = 100
//! cjk_delay_ms = 40
//!
//! [prompt]
//! system_prompt = "You are a helpful assistant."
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{Normalizer, DEFAULT_SYSTEM_PROMPT};
use crate::registry::{ApiKey, ModelConfig};
use crate::streaming::{Pacing, SessionConfig, StreamManagerConfig};

/// Default upstream base URL
pub const DEFAULT_ENDPOINT: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Default upstream model id
pub const DEFAULT_MODEL: &str = "qwen-plus";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Upstream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Base URL of the OpenAI-compatible API
    pub endpoint: Option<String>,

    /// Bearer credential
    pub api_key: Option<String>,

    /// Initial model id
    pub model_id: Option<String>,

    /// Default sampling temperature
    pub temperature: Option<f32>,

    /// Default reply length
    pub max_tokens: Option<u32>,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Streaming section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Session wall-clock budget in seconds
    pub session_timeout_secs: Option<u64>,

    /// Fragment channel capacity
    pub channel_capacity: Option<usize>,

    /// Maximum concurrent streaming sessions
    pub max_concurrent_sessions: Option<usize>,

    /// Delay after ordinary characters in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Delay after punctuation in milliseconds
    pub punctuation_delay_ms: Option<u64>,

    /// Delay after CJK ideographs in milliseconds
    pub cjk_delay_ms: Option<u64>,
}

/// Prompt section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptToml {
    /// System prompt injected when a conversation has none
    pub system_prompt: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// Upstream provider section
    pub upstream: UpstreamToml,

    /// Streaming section
    pub streaming: StreamingToml,

    /// Prompt section
    pub prompt: PromptToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective gateway configuration
///
/// Use [`load_config`] to build one with proper priority handling, then
/// [`GatewayConfig::model_config`] to validate the upstream settings.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible API (validated lazily)
    pub endpoint: String,

    /// Bearer credential
    pub api_key: ApiKey,

    /// Initial model id
    pub model_id: String,

    /// Default sampling temperature
    pub temperature: f32,

    /// Default reply length
    pub max_tokens: u32,

    /// HTTP request timeout for upstream calls
    pub request_timeout: Duration,

    /// Session wall-clock budget
    pub session_timeout: Duration,

    /// Fragment channel capacity
    pub channel_capacity: usize,

    /// Maximum concurrent streaming sessions
    pub max_concurrent_sessions: usize,

    /// Fragment pacing
    pub pacing: Pacing,

    /// Default system prompt
    pub system_prompt: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        let streams = StreamManagerConfig::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: ApiKey::new(""),
            model_id: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            request_timeout: Duration::from_secs(120),
            session_timeout: session.timeout,
            channel_capacity: session.channel_capacity,
            max_concurrent_sessions: streams.max_concurrent_sessions,
            pacing: session.pacing,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Validate upstream settings and build the initial model configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the endpoint is not an
    /// absolute http(s) URL, the model id is blank, the temperature is negative
    /// or the token limit is zero.
    pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
        let endpoint = Url::parse(self.endpoint.trim()).map_err(|e| {
            ConfigError::ValidationError(format!("endpoint {:?} is not a URL: {e}", self.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || !endpoint.has_host() {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {:?} must be an absolute http(s) URL",
                self.endpoint
            )));
        }

        let model_id = self.model_id.trim();
        if model_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "model id must not be empty".to_string(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than zero".to_string(),
            ));
        }

        if self.api_key.is_empty() {
            tracing::warn!("No API key configured, upstream calls will likely be rejected");
        }

        Ok(ModelConfig {
            model_id: model_id.to_string(),
            endpoint,
            api_key: self.api_key.clone(),
            default_temperature: self.temperature,
            default_max_tokens: self.max_tokens,
        })
    }

    /// Per-session settings
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            timeout: self.session_timeout,
            channel_capacity: self.channel_capacity.max(1),
            pacing: self.pacing,
        }
    }

    /// Stream manager settings
    #[must_use]
    pub fn stream_manager_config(&self) -> StreamManagerConfig {
        StreamManagerConfig {
            session: self.session_config(),
            max_concurrent_sessions: self.max_concurrent_sessions,
        }
    }

    /// Conversation normalizer using the configured system prompt
    #[must_use]
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.system_prompt.clone())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-gateway/gateway.toml` or
/// `~/.config/chat-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-gateway").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) {
    let upstream = &toml.upstream;
    if let Some(ref endpoint) = upstream.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(ref key) = upstream.api_key {
        config.api_key = ApiKey::new(key.clone());
    }
    if let Some(ref model) = upstream.model_id {
        config.model_id.clone_from(model);
    }
    if let Some(temperature) = upstream.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = upstream.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(secs) = upstream.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    let streaming = &toml.streaming;
    if let Some(secs) = streaming.session_timeout_secs {
        config.session_timeout = Duration::from_secs(secs);
    }
    if let Some(capacity) = streaming.channel_capacity {
        config.channel_capacity = capacity;
    }
    if let Some(max) = streaming.max_concurrent_sessions {
        config.max_concurrent_sessions = max;
    }
    if let Some(ms) = streaming.base_delay_ms {
        config.pacing.base = Duration::from_millis(ms);
    }
    if let Some(ms) = streaming.punctuation_delay_ms {
        config.pacing.punctuation = Duration::from_millis(ms);
    }
    if let Some(ms) = streaming.cjk_delay_ms {
        config.pacing.cjk = Duration::from_millis(ms);
    }

    if let Some(ref prompt) = toml.prompt.system_prompt {
        config.system_prompt.clone_from(prompt);
    }
}

/// Apply environment variable overrides to the config
///
/// Unparseable numeric values are ignored with a warning.
fn apply_env_config<F>(config: &mut GatewayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(var = key, value, "Ignoring unparseable environment variable");
        }
        parsed
    }

    if let Some(endpoint) = env("CHAT_GATEWAY_ENDPOINT") {
        config.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(key) = env("CHAT_GATEWAY_API_KEY") {
        config.api_key = ApiKey::new(key);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("CHAT_GATEWAY_MODEL") {
        config.model_id = model;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("CHAT_GATEWAY_TEMPERATURE") {
        if let Some(t) = parsed("CHAT_GATEWAY_TEMPERATURE", &value) {
            config.temperature = t;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("CHAT_GATEWAY_MAX_TOKENS") {
        if let Some(n) = parsed("CHAT_GATEWAY_MAX_TOKENS", &value) {
            config.max_tokens = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("CHAT_GATEWAY_REQUEST_TIMEOUT") {
        if let Some(secs) = parsed("CHAT_GATEWAY_REQUEST_TIMEOUT", &value) {
            config.request_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("CHAT_GATEWAY_SESSION_TIMEOUT") {
        if let Some(secs) = parsed("CHAT_GATEWAY_SESSION_TIMEOUT", &value) {
            config.session_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(prompt) = env("CHAT_GATEWAY_SYSTEM_PROMPT") {
        config.system_prompt = prompt;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub endpoint: Option<String>,

    /// Model id override
    pub model_id: Option<String>,

    /// Session timeout override (seconds)
    pub session_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set model id override
    #[must_use]
    pub fn with_model_id(mut self, model: String) -> Self {
        self.model_id = Some(model);
        self
    }

    /// Set session timeout override
    #[must_use]
    pub fn with_session_timeout_secs(mut self, secs: u64) -> Self {
        self.session_timeout_secs = Some(secs);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.endpoint.is_some() || self.model_id.is_some() || self.session_timeout_secs.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref endpoint) = self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(ref model) = self.model_id {
            config.model_id.clone_from(model);
        }
        if let Some(secs) = self.session_timeout_secs {
            config.session_timeout = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
