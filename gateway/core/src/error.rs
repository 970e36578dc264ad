//! Gateway Error Taxonomy
//!
//! Every failure in the core is caught at the component that produced it and
//! converted into one of these typed outcomes. Nothing here is allowed to
//! escape to the hosting process as a panic; user-visible failures are always
//! a readable message.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::UpstreamError;

/// Apology prefix used whenever an upstream failure is surfaced to a client
pub const APOLOGY_PREFIX: &str =
    "Sorry, I encountered an issue and cannot answer your question. Error: ";

/// Build the user-visible apology text for a failure cause
#[must_use]
pub fn apology(cause: impl std::fmt::Display) -> String {
    format!("{APOLOGY_PREFIX}{cause}")
}

/// Errors produced by the gateway core
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed inbound request (unparseable body, out-of-range parameters)
    #[error("invalid request: {0}")]
    Validation(String),

    /// Upstream provider failed or returned an unusable payload
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Client disconnect or channel write failure mid-stream
    #[error("stream session failed: {0}")]
    Session(String),

    /// Session exceeded its wall-clock budget
    #[error("stream session timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Invalid configuration or model switch input
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Application-level status code for this error
    #[must_use]
    pub fn api_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Config(_) => 400,
            Self::Upstream(_) => 502,
            Self::Session(_) => 499,
            Self::Timeout(_) => 504,
        }
    }

    /// Convert into the structured error returned to clients
    ///
    /// Upstream failures are phrased as an apology rather than a raw cause.
    #[must_use]
    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            Self::Upstream(cause) => apology(cause),
            other => other.to_string(),
        };
        ApiError::new(self.api_code(), message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        err.to_api_error()
    }
}

/// Structured error returned to clients: `{code, message}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Application status code (non-2xx)
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Response envelope: `{code, message, data}`
///
/// `code` is 200 with message `"success"` on success; on failure `data` is
/// absent and `code`/`message` describe the error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Application status code
    pub code: u16,
    /// Status message
    pub message: String,
    /// Payload (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Error response
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Whether this response represents success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

impl<T> From<Result<T, ApiError>> for ApiResponse<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.code, err.message),
        }
    }
}
