//! The conversation state machine shared by every chat consumer.
//!
//! Two message lists: a frozen *system* context and a *conversation* that
//! grows one user+assistant pair per turn. Template substitution rewrites
//! both lists permanently. Sending retries transport failures with
//! exponential backoff; token accounting runs after the reply is appended
//! so an oversize stack surfaces as [`FinishReason::Length`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::template;
use super::{ChatError, ChatModel, ChatResponse, FinishReason, Message, Result};

/// Transport retry policy for one `send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum outbound calls per send (1 = no retries).
    pub max_tries: u32,

    /// Base delay for exponential backoff between tries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            backoff_base_ms: 500,
        }
    }
}

/// Conversation state bound to one chat model.
pub struct ChatInterface {
    model: Arc<dyn ChatModel>,
    system_messages: Vec<Message>,
    messages: Vec<Message>,
    retry: RetryPolicy,
}

impl ChatInterface {
    pub fn new(model: Arc<dyn ChatModel>, system_messages: Vec<Message>) -> Self {
        Self {
            model,
            system_messages,
            messages: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn system_messages(&self) -> &[Message] {
        &self.system_messages
    }

    /// Replace the frozen system context.
    pub fn set_system_messages(&mut self, messages: Vec<Message>) {
        self.system_messages = messages;
    }

    /// The conversation so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a message to the conversation.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Swap the conversation out, returning the previous one. Used by
    /// history strategies that stash and restore state around a turn.
    pub fn replace_messages(&mut self, messages: Vec<Message>) -> Vec<Message> {
        std::mem::replace(&mut self.messages, messages)
    }

    /// Drop the whole conversation.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Reverse the conversation in place.
    pub fn reverse_messages(&mut self) {
        self.messages.reverse();
    }

    /// Substitute `{{name}}` placeholders across the system messages and
    /// the conversation. The rewritten messages replace the originals, so
    /// the substitution is permanent.
    pub fn apply_template(&mut self, vars: &HashMap<String, String>) {
        for message in self
            .system_messages
            .iter_mut()
            .chain(self.messages.iter_mut())
        {
            message.content = template::render(&message.content, vars);
        }
    }

    /// Send the stack to the model. When `message` is given it is appended
    /// as a user message first. The assistant reply is appended to the
    /// conversation; usage beyond the model's token limit is reported as
    /// [`FinishReason::Length`].
    pub async fn send(&mut self, message: Option<&str>) -> Result<ChatResponse> {
        if let Some(content) = message {
            self.push_message(Message::user(content));
        }

        let mut stack: Vec<Message> = self.system_messages.clone();
        stack.extend(self.messages.iter().cloned());

        let reply = self.invoke_with_retry(&stack).await?;
        self.push_message(reply.clone());

        stack.push(reply.clone());
        let total_tokens = self.model.count_tokens(&stack);
        let limit = self.model.token_limit();
        let finish_reason = if total_tokens > limit {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };
        debug!(total_tokens, limit, ?finish_reason, "chat turn finished");

        Ok(ChatResponse {
            message: reply,
            total_tokens: total_tokens.min(limit),
            finish_reason,
        })
    }

    async fn invoke_with_retry(&self, stack: &[Message]) -> Result<Message> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_tries.max(1) {
            match self.model.invoke(stack).await {
                Ok(reply) => return Ok(reply),
                Err(ChatError::InvalidResponse(message)) => {
                    return Err(ChatError::InvalidResponse(message))
                }
                Err(ChatError::Transport { message, .. }) => {
                    warn!(attempt, model = self.model.id(), %message, "chat request failed");
                    last_error = message;
                }
            }
            if attempt < self.retry.max_tries {
                let delay =
                    Duration::from_millis(self.retry.backoff_base_ms * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }
        }
        Err(ChatError::Transport {
            tries: self.retry.max_tries,
            message: last_error,
        })
    }
}
