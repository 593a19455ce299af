//! Deterministic mock provider.
//!
//! Evaluator prompts each describe the JSON shape they expect back; the
//! mock keys on distinctive field names in the prompt text to synthesize a
//! matching default reply. Action-selection replies can be scripted in
//! order, and failures can be injected ahead of any call, so tests drive
//! the full pipeline without a network.

use crate::error::{LlmError, Result};
use crate::{LlmClient, Message};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Failure kinds the mock can inject
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transport(String),
    RateLimit(String),
    Status(u16, String),
    /// Transport succeeds but the body is not JSON
    Garbage(String),
}

impl MockFailure {
    fn into_error(self) -> LlmError {
        match self {
            MockFailure::Transport(msg) => LlmError::Transport(msg),
            MockFailure::RateLimit(msg) => LlmError::RateLimit(msg),
            MockFailure::Status(code, message) => LlmError::Status { code, message },
            MockFailure::Garbage(_) => unreachable!("garbage is returned, not raised"),
        }
    }
}

/// In-process mock LLM
#[derive(Default)]
pub struct MockLlmClient {
    /// Replies popped in order by action-selection calls only
    scripted_actions: Mutex<VecDeque<Value>>,
    /// Failures popped ahead of any call
    failures: Mutex<VecDeque<MockFailure>>,
    call_count: AtomicUsize,
    action_call_count: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw action-selection reply
    pub fn push_action_value(&self, value: Value) {
        self.scripted_actions.lock().unwrap().push_back(value);
    }

    /// Queue an action-selection reply with the given action and parameters
    pub fn push_action(&self, action: &str, parameters: Value, rationale: &str) {
        self.push_action_value(json!({
            "selected_action": action,
            "action_parameters": parameters,
            "rationale": rationale,
        }));
    }

    /// Queue a failure that the next call of any kind will raise
    pub fn push_failure(&self, failure: MockFailure) {
        self.failures.lock().unwrap().push_back(failure);
    }

    /// Total calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Action-selection calls made
    pub fn action_call_count(&self) -> usize {
        self.action_call_count.load(Ordering::SeqCst)
    }

    fn default_reply(&self, prompt: &str) -> Value {
        if prompt.contains("alignment_check") {
            json!({
                "context": "Routine request with no ethical tension.",
                "alignment_check": "Action aligns with stated principles.",
                "decision": "proceed",
                "monitoring": "standard",
            })
        } else if prompt.contains("plausibility_score") {
            json!({
                "plausibility_score": 0.95,
                "flags": [],
                "reasoning": "Within common-sense expectations.",
            })
        } else if prompt.contains("recommended_action") {
            json!({
                "domain": "general",
                "score": 0.9,
                "flags": [],
                "reasoning": "No domain-specific concerns.",
            })
        } else {
            self.action_call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.scripted_actions.lock().unwrap().pop_front() {
                scripted
            } else {
                json!({
                    "selected_action": "speak",
                    "action_parameters": { "content": "Acknowledged." },
                    "rationale": "Default mock reply.",
                })
            }
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call_raw(
        &self,
        messages: &[Message],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            if let MockFailure::Garbage(text) = failure {
                return Ok(text);
            }
            return Err(failure.into_error());
        }

        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(self.default_reply(&prompt).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_structured;

    #[tokio::test]
    async fn test_default_evaluator_replies() {
        let mock = MockLlmClient::new();

        let ethical = mock
            .call_structured_value(
                &[Message::system("Reply with JSON keys context, alignment_check, decision")],
                256,
                0.0,
            )
            .await
            .unwrap();
        assert_eq!(ethical["decision"], "proceed");

        let cs = mock
            .call_structured_value(
                &[Message::system("Reply with JSON keys plausibility_score, flags, reasoning")],
                256,
                0.0,
            )
            .await
            .unwrap();
        assert!(cs["plausibility_score"].as_f64().unwrap() > 0.5);
    }

    #[tokio::test]
    async fn test_scripted_action_order() {
        let mock = MockLlmClient::new();
        mock.push_action("defer", json!({"reason": "needs review"}), "scripted");

        let first = mock
            .call_structured_value(&[Message::user("pick an action")], 256, 0.0)
            .await
            .unwrap();
        assert_eq!(first["selected_action"], "defer");

        let second = mock
            .call_structured_value(&[Message::user("pick an action")], 256, 0.0)
            .await
            .unwrap();
        assert_eq!(second["selected_action"], "speak");
        assert_eq!(mock.action_call_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_transport_failure() {
        let mock = MockLlmClient::new();
        mock.push_failure(MockFailure::Transport("connection refused".into()));

        let err = mock
            .call_raw(&[Message::user("anything")], 16, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));

        // Subsequent call succeeds
        assert!(mock.call_raw(&[Message::user("again")], 16, 0.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_fails_structured_parse() {
        let mock = MockLlmClient::new();
        mock.push_failure(MockFailure::Garbage("sorry, plain text only".into()));

        #[derive(Debug, serde::Deserialize)]
        struct Anything {
            #[allow(dead_code)]
            selected_action: String,
        }

        let result: Result<Anything> =
            call_structured(&mock, &[Message::user("pick an action")], 16, 0.0).await;
        assert!(matches!(result.unwrap_err(), LlmError::Structured(_)));
    }
}
