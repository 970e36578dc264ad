//! Shared fixtures for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::backend::{ChatBackend, Completion, UpstreamError};
use crate::messages::Conversation;
use crate::registry::{ApiKey, ModelConfig};

pub(crate) fn test_config() -> ModelConfig {
    ModelConfig {
        model_id: "qwen-plus".to_string(),
        endpoint: Url::parse("https://llm.example.com/v1").unwrap(),
        api_key: ApiKey::new("sk-test"),
        default_temperature: 0.7,
        default_max_tokens: 2048,
    }
}

/// Config pointing at a mock server root
pub(crate) fn test_config_for(uri: &str) -> ModelConfig {
    ModelConfig {
        endpoint: Url::parse(&format!("{uri}/v1")).unwrap(),
        ..test_config()
    }
}

/// Backend that returns a canned reply after an optional (virtual) delay
pub(crate) struct ScriptedBackend {
    reply: Result<String, UpstreamError>,
    delay: Duration,
    calls: AtomicUsize,
    finished: AtomicBool,
}

impl ScriptedBackend {
    pub(crate) fn reply(text: impl Into<String>) -> Self {
        Self::new(Ok(text.into()))
    }

    pub(crate) fn fail(error: UpstreamError) -> Self {
        Self::new(Err(error))
    }

    fn new(reply: Result<String, UpstreamError>) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether at least one call ran to completion
    pub(crate) fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _conversation: &Conversation) -> Result<Completion, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.store(true, Ordering::SeqCst);
        self.reply
            .clone()
            .map(|content| Completion::new(content, "scripted-model"))
    }
}
