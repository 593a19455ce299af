//! OpenAI-compatible HTTP provider.
//!
//! Works against any endpoint implementing the OpenAI `/chat/completions`
//! shape (OpenAI itself, local servers, proxies). Authentication is a
//! bearer token when a key is configured.

use crate::error::{LlmError, Result};
use crate::{LlmClient, Message, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    /// Bearer token; omitted for unauthenticated local servers
    pub api_key: Option<String>,
    /// Model identifier passed through to the provider
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible chat client
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiCompatibleClient {
    /// Create a new client with the given configuration
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(LlmError::Config("endpoint must not be empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".into()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn convert_message(msg: &Message) -> ChatMessage {
        ChatMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: msg.content.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn call_raw(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            max_tokens,
            temperature,
            stream: false,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        debug!(url = %url, model = %self.config.model, "Sending chat completion request");

        let response = req.send().await.map_err(LlmError::from)?;
        let status = response.status();

        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimit(detail));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                code: status.as_u16(),
                message: detail,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Structured(format!("malformed completion response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Structured("completion response had no choices".into()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(OpenAiCompatibleClient::new(OpenAiConfig::new("", "gpt-4")).is_err());
        assert!(OpenAiCompatibleClient::new(OpenAiConfig::new("http://localhost", "")).is_err());
        assert!(
            OpenAiCompatibleClient::new(OpenAiConfig::new("http://localhost:8000/v1", "local"))
                .is_ok()
        );
    }

    #[test]
    fn test_message_conversion() {
        let msg = OpenAiCompatibleClient::convert_message(&Message::system("rules"));
        assert_eq!(msg.role, "system");
        assert_eq!(msg.content, "rules");
    }
}
