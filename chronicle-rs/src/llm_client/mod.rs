//! LLM client abstraction.
//!
//! # Implementations
//! - [`openai::OpenAiClient`]: OpenAI chat completions via `async-openai`.
//!
//! The client returns free-form text plus token usage. Callers that expect a
//! structured block inside the text parse it themselves and must tolerate its
//! absence.

pub mod openai;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A chat message for the LLM conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Speaker role in a chat conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Tokens billed for one call. Zero for cache hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Assistant text plus what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Trait for chat-completion clients.
#[allow(async_fn_in_trait)]
pub trait LlmClient: Send + Sync {
    /// Send a request and return the assistant's text.
    async fn generate(&self, messages: &[Message]) -> Result<Completion>;
}
