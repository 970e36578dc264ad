//! Conversation Messages
//!
//! Normalizes the raw role/content pairs a client sends into an ordered
//! [`Conversation`] of role-tagged [`Turn`]s that can be forwarded upstream.
//!
//! Normalization rules:
//!
//! - Only the roles `system`, `user` and `assistant` are recognized. Any other
//!   role (or a missing one) is dropped with a warning.
//! - Turns with empty content are dropped the same way.
//! - Dropped turns are recorded on the conversation so callers and tests can
//!   observe them; dropping is never an error.
//! - The result carries exactly one system turn, at position 0. Several system
//!   turns are merged in order (blank-line separated); when the caller supplied
//!   none, the default system prompt is injected.

use serde::{Deserialize, Serialize};

/// System instruction injected when the caller supplies none
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Qwen, a large language model developed by Alibaba Cloud. \
You can provide information, answer questions, create content, and assist users with various tasks. \
Please be friendly, professional, and helpful. \
If you're not sure about an answer, be honest and say so instead of making up information.";

/// Who sent a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End user input
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Parse a wire role name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    /// Wire name of this role
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who sent this turn
    pub role: Role,
    /// Message content (never empty once normalized)
    pub content: String,
}

impl Turn {
    /// Create a new turn
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A message as received from a client, before normalization
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTurn {
    /// Role name as sent (may be missing or unknown)
    #[serde(default)]
    pub role: Option<String>,
    /// Content as sent (may be missing)
    #[serde(default)]
    pub content: Option<String>,
}

impl RawTurn {
    /// Create a raw turn from role and content
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            content: Some(content.into()),
        }
    }
}

impl From<&Turn> for RawTurn {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role.as_str(), turn.content.clone())
    }
}

/// Why a raw turn was not forwarded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Role missing or not one of system/user/assistant
    UnknownRole,
    /// Content missing or empty
    EmptyContent,
}

/// Record of a raw turn skipped during normalization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedTurn {
    /// Position in the raw input
    pub index: usize,
    /// Role as sent
    pub role: Option<String>,
    /// Why it was dropped
    pub reason: DropReason,
}

/// Generation parameters supplied with a request
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature override (falls back to the model default)
    pub temperature: Option<f32>,
    /// Reply length override (falls back to the model default)
    pub max_tokens: Option<u32>,
    /// Deep thinking mode requested by the client
    pub deep_thinking: bool,
}

impl GenerationParams {
    /// Check parameter ranges: temperature finite and >= 0, max tokens > 0
    pub fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(format!("temperature must be a non-negative number, got {t}"));
            }
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Normalized, ordered sequence of turns plus generation parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered turns; the first is always a system turn
    pub turns: Vec<Turn>,
    /// Generation parameters
    #[serde(default)]
    pub params: GenerationParams,
    /// Raw turns skipped during normalization
    #[serde(default, skip_serializing)]
    pub dropped: Vec<DroppedTurn>,
}

impl Conversation {
    /// Attach generation parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether there are no turns (never true once normalized)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Content of the last user turn, if any
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Raw form of the turns, suitable for normalizing again
    #[must_use]
    pub fn to_raw(&self) -> Vec<RawTurn> {
        self.turns.iter().map(RawTurn::from).collect()
    }
}

/// Turns raw client messages into a [`Conversation`]
#[derive(Clone, Debug)]
pub struct Normalizer {
    system_prompt: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl Normalizer {
    /// Create a normalizer that injects `system_prompt` when none is present
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// The system prompt injected by this normalizer
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Normalize raw turns. `None` is treated as an empty list.
    #[must_use]
    pub fn normalize(&self, raw: Option<&[RawTurn]>) -> Conversation {
        let raw = raw.unwrap_or_default();
        let mut system = Vec::new();
        let mut rest = Vec::with_capacity(raw.len());
        let mut dropped = Vec::new();

        for (index, item) in raw.iter().enumerate() {
            let Some(role) = item.role.as_deref().and_then(Role::parse) else {
                tracing::warn!(
                    index,
                    role = item.role.as_deref().unwrap_or("<missing>"),
                    "Unknown message role, dropping turn"
                );
                dropped.push(DroppedTurn {
                    index,
                    role: item.role.clone(),
                    reason: DropReason::UnknownRole,
                });
                continue;
            };

            let content = match item.content.as_deref() {
                Some(c) if !c.is_empty() => c,
                _ => {
                    tracing::warn!(index, role = %role, "Empty message content, dropping turn");
                    dropped.push(DroppedTurn {
                        index,
                        role: item.role.clone(),
                        reason: DropReason::EmptyContent,
                    });
                    continue;
                }
            };

            let turn = Turn::new(role, content);
            if role == Role::System {
                system.push(turn);
            } else {
                rest.push(turn);
            }
        }

        let system = match system.len() {
            0 => Turn::system(self.system_prompt.clone()),
            1 => system.remove(0),
            n => {
                tracing::debug!(count = n, "Merging system turns");
                let merged: Vec<String> = system.into_iter().map(|t| t.content).collect();
                Turn::system(merged.join("\n\n"))
            }
        };
        let mut turns = Vec::with_capacity(rest.len() + 1);
        turns.push(system);
        turns.extend(rest);

        Conversation {
            turns,
            params: GenerationParams::default(),
            dropped,
        }
    }
}

/// Normalize with the default system prompt
#[must_use]
pub fn normalize(raw: Option<&[RawTurn]>) -> Conversation {
    Normalizer::default().normalize(raw)
}
