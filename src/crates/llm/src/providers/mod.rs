//! LLM provider implementations.
//!
//! Two providers ship with the runtime: an OpenAI-compatible HTTP client
//! for any `/chat/completions` endpoint, and a deterministic mock used by
//! tests and offline runs.

pub mod mock;
pub mod openai;

pub use mock::{MockFailure, MockLlmClient};
pub use openai::{OpenAiCompatibleClient, OpenAiConfig};
