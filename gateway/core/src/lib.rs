//! Gateway Core - Streaming Chat Gateway for OpenAI-compatible Providers
//!
//! This crate sits between chat clients and an OpenAI-compatible completion
//! provider. It normalizes inbound conversations, forwards them upstream
//! against a switchable model, and either returns the whole reply or replays
//! it as a paced, character-by-character stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Transports (HTTP / SSE / CLI)                    │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │ ChatRequest
//! ┌───────────────────────────┼─────────────────────────────────────┐
//! │                      GATEWAY CORE                                │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │                      ChatGateway                             │ │
//! │  │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐ │ │
//! │  │  │ Normalizer │  │ StreamManager│  │ ChatBackend          │ │ │
//! │  │  │ (messages) │  │  (sessions)  │  │ (OpenAI-compatible)  │ │ │
//! │  │  └────────────┘  └──────────────┘  └──────────┬───────────┘ │ │
//! │  │                                    ModelRegistry (shared)    │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatGateway`]: request-facing service (chat, stream, switch model)
//! - [`ChatRequest`]: inbound request as received from a client
//! - [`Conversation`]: normalized turns plus generation parameters
//! - [`ModelRegistry`]: process-wide, switchable model configuration
//! - [`SessionHandle`]: client side of a paced streaming session
//! - [`GatewayConfig`]: layered configuration (CLI, env, TOML, defaults)
//!
//! # Quick Start
//!
//! ```ignore
//! use gateway_core::{load_config, ChatGateway, ChatRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let gateway = ChatGateway::from_config(&config)?;
//!
//!     let request = ChatRequest::from_json(r#"{"messages":[{"role":"user","content":"hi"}]}"#)?;
//!     let mut session = gateway.stream_chat(&request)?;
//!     while let Some(fragment) = session.recv().await {
//!         print!("{}", fragment.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: upstream provider abstraction and the OpenAI-compatible client
//! - [`config`]: TOML/env configuration loading
//! - [`error`]: error taxonomy and the client-facing response envelope
//! - [`gateway`]: the gateway service facade
//! - [`messages`]: roles, turns and conversation normalization
//! - [`registry`]: active model configuration
//! - [`streaming`]: fragment pacing and stream sessions

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod registry;
pub mod streaming;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use backend::{ChatBackend, Completion, OpenAiCompatBackend, UpstreamError};
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    ConfigError, ConfigOverrides, ConfigSource, GatewayConfig, GatewayToml,
};
pub use error::{apology, ApiError, ApiResponse, GatewayError, APOLOGY_PREFIX};
pub use gateway::{ChatGateway, ChatReply, ChatRequest};
pub use messages::{
    normalize, Conversation, GenerationParams, Normalizer, RawTurn, Role, Turn,
    DEFAULT_SYSTEM_PROMPT,
};
pub use registry::{ApiKey, ModelConfig, ModelRegistry};

// Streaming exports
pub use streaming::{
    Fragment, Pacing, SessionConfig, SessionHandle, SessionId, SessionReport, SessionState,
    StreamManager, StreamManagerConfig, StreamRegisterError, StreamStats,
};
