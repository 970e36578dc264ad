//! Chat Backend Traits
//!
//! Trait definitions for upstream chat providers. The gateway only ever talks
//! to a provider through [`ChatBackend`], so tests can inject scripted
//! backends and new providers can be added without touching session logic.
//!
//! The contract is deliberately synchronous from the caller's point of view:
//! one call, one complete reply. Incremental delivery is synthesized later by
//! the fragment emitter.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::Conversation;

/// Failure talking to the upstream provider
///
/// Never retried automatically. No partial text is ever returned alongside
/// one of these.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Connection failure, DNS failure, TLS failure, etc.
    #[error("network error: {0}")]
    Network(String),

    /// The HTTP call exceeded the client timeout
    #[error("upstream request timed out")]
    Timeout,

    /// Non-2xx HTTP status
    #[error("upstream returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Body was not the expected JSON shape
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// `choices` missing or empty
    #[error("upstream response contained no choices")]
    EmptyChoices,

    /// `choices[0].message.content` missing or null
    #[error("upstream response is missing choices[0].message.content")]
    MissingContent,
}

/// A complete reply from the upstream provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// The reply text
    pub content: String,
    /// Model id the request was issued against
    pub model: String,
    /// Wall-clock time spent on the upstream call
    pub duration: Duration,
}

impl Completion {
    /// Create a completion with zero duration
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            duration: Duration::ZERO,
        }
    }
}

/// Upstream chat provider
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs (e.g. "openai-compatible")
    fn name(&self) -> &str;

    /// Send the whole conversation and wait for the complete reply
    ///
    /// May block for the full duration of upstream generation.
    async fn complete(&self, conversation: &Conversation) -> Result<Completion, UpstreamError>;

    /// Check whether the provider is reachable
    async fn health_check(&self) -> bool {
        true
    }
}
