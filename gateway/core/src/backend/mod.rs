//! Upstream Backend Integration
//!
//! Abstracted access to chat completion providers through a common trait.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: any `/chat/completions` provider (default)
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{ChatBackend, OpenAiCompatBackend};
//!
//! let backend = OpenAiCompatBackend::new(registry, Duration::from_secs(120))?;
//! let completion = backend.complete(&conversation).await?;
//! ```

mod openai;
mod traits;

pub use openai::OpenAiCompatBackend;
pub use traits::{ChatBackend, Completion, UpstreamError};
