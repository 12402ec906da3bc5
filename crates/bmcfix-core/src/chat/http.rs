//! OpenAI-compatible HTTP implementation of [`ChatModel`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ChatError, ChatModel, Message, Result, Role};

/// Configuration for [`HttpChatModel`].
#[derive(Debug, Clone)]
pub struct HttpChatConfig {
    /// Full chat-completions endpoint URL.
    pub endpoint: String,

    /// Bearer token, when the endpoint requires one.
    pub api_key: Option<String>,

    /// Model identifier sent in the request body.
    pub model_id: String,

    pub temperature: f32,

    /// Context window size the interface enforces.
    pub token_limit: usize,

    /// Per-call timeout. Exceeded requests surface as transport errors and
    /// count against the retry budget.
    pub request_timeout: Duration,
}

impl Default for HttpChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model_id: "gpt-4o-mini".to_string(),
            temperature: 1.0,
            token_limit: 16_384,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Chat model backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpChatModel {
    config: HttpChatConfig,
    client: reqwest::Client,
}

impl HttpChatModel {
    pub fn new(config: HttpChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Transport {
                tries: 0,
                message: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for HttpChatModel {
    fn id(&self) -> &str {
        &self.config.model_id
    }

    async fn invoke(&self, messages: &[Message]) -> Result<Message> {
        let body = ChatRequest {
            model: &self.config.model_id,
            temperature: self.config.temperature,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: Self::wire_role(m.role),
                    content: &m.content,
                })
                .collect(),
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ChatError::Transport {
            tries: 1,
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(ChatError::Transport {
                tries: 1,
                message: format!("endpoint returned {}", response.status()),
            });
        }

        let completion: ChatCompletion =
            response.json().await.map_err(|e| ChatError::Transport {
                tries: 1,
                message: e.to_string(),
            })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::InvalidResponse("no choices in completion".to_string()))?;
        Ok(Message::assistant(choice.message.content))
    }

    /// Approximate accounting: one token per four characters plus a small
    /// per-message overhead. Exact counts require the provider's tokenizer;
    /// the approximation only has to be monotone in stack size.
    fn count_tokens(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| m.content.chars().count() / 4 + 4)
            .sum()
    }

    fn token_limit(&self) -> usize {
        self.config.token_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_count_grows_with_stack() {
        let model = HttpChatModel::new(HttpChatConfig::default()).unwrap();
        let short = [Message::user("hi")];
        let long = [
            Message::user("hi"),
            Message::assistant("a considerably longer reply with many words"),
        ];
        assert!(model.count_tokens(&long) > model.count_tokens(&short));
    }

    #[test]
    fn wire_roles_match_protocol() {
        assert_eq!(HttpChatModel::wire_role(Role::System), "system");
        assert_eq!(HttpChatModel::wire_role(Role::User), "user");
        assert_eq!(HttpChatModel::wire_role(Role::Assistant), "assistant");
    }
}
