//! Messages, the chat model contract, and the conversation interface.

pub mod http;
pub mod interface;
pub mod template;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use interface::{ChatInterface, RetryPolicy};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Role of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Why a chat turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Complete model output.
    Stop,
    /// Conversation exceeded the model's token limit.
    Length,
}

/// The result of one chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub message: Message,
    pub total_tokens: usize,
    pub finish_reason: FinishReason,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from talking to a chat model.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport error after {tries} tries: {message}")]
    Transport { tries: u32, message: String },

    #[error("malformed chat model response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

// ---------------------------------------------------------------------------
// Model contract
// ---------------------------------------------------------------------------

/// The narrow contract the repair core needs from an LLM.
///
/// Transport-level rate limiting and per-call timeouts belong to the
/// implementation; retries are handled by [`ChatInterface`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier for logging.
    fn id(&self) -> &str;

    /// Send a message stack and return the assistant reply. One outbound
    /// call, no mid-call cancellation.
    async fn invoke(&self, messages: &[Message]) -> Result<Message>;

    /// Token usage of a message stack, per this model's accounting.
    fn count_tokens(&self, messages: &[Message]) -> usize;

    /// Context window size in tokens.
    fn token_limit(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("a").role, Role::System);
        assert_eq!(Message::user("b").role, Role::User);
        assert_eq!(Message::assistant("c").role, Role::Assistant);
    }

    #[test]
    fn role_serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    }
}
