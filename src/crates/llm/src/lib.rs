//! LLM service contract and providers for the aegis runtime.
//!
//! The cognitive core consumes language models exclusively through the
//! [`LlmClient`] trait: a raw completion call plus a structured call that
//! must yield a JSON object. Providers implemented here:
//!
//! - [`providers::OpenAiCompatibleClient`] - any OpenAI-style
//!   `/chat/completions` endpoint over HTTP
//! - [`providers::MockLlmClient`] - deterministic in-process provider for
//!   tests and offline runs
//!
//! Structured responses are recovered leniently: markdown-fenced or bare
//! JSON objects are accepted, and a single-quote to double-quote rewrite is
//! attempted before giving up with a typed parse error.

pub mod error;
pub mod extract;
pub mod providers;

pub use error::{LlmError, Result};
pub use extract::extract_json;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to or received from a model
#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// Service contract consumed by the cognitive core
///
/// Object-safe: the typed structured call is provided by
/// [`call_structured`], which layers serde on top of
/// [`LlmClient::call_structured_value`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for registry and log lines
    fn name(&self) -> &str;

    /// Raw completion call returning the model's text
    async fn call_raw(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;

    /// Structured call returning a JSON object
    ///
    /// The default implementation delegates to [`LlmClient::call_raw`] and
    /// recovers a JSON object from the response text.
    async fn call_structured_value(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<serde_json::Value> {
        let text = self.call_raw(messages, max_tokens, temperature).await?;
        extract_json(&text)
    }
}

/// Typed structured call: invoke the model and parse into `T`
///
/// A response that is transportable but does not match the declared schema
/// is an [`LlmError::Structured`] error; retry policy is the caller's
/// concern.
pub async fn call_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    messages: &[Message],
    max_tokens: u32,
    temperature: f32,
) -> Result<T> {
    let value = client
        .call_structured_value(messages, max_tokens, temperature)
        .await?;
    serde_json::from_value(value.clone()).map_err(|e| {
        LlmError::Structured(format!(
            "response did not match expected schema: {} (got: {})",
            e, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let m = Message::system("be helpful");
        assert_eq!(m.role, Role::System);
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
