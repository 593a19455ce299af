//! Service traits provided by adapters and consumed through the buses.

use crate::error::Result;
use crate::schemas::ChannelContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outbound communication surface (SPEAK, deferral reports)
#[async_trait]
pub trait CommunicationService: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver a message to a channel
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()>;

    /// Channels this service can deliver to
    fn channel_list(&self) -> Vec<ChannelContext> {
        Vec::new()
    }
}

/// Description of one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments
    pub parameters: serde_json::Value,
}

/// Tool execution surface
#[async_trait]
pub trait ToolService: Send + Sync {
    fn name(&self) -> &str;

    async fn available_tools(&self) -> Vec<String>;

    async fn tool_info(&self, tool_name: &str) -> Option<ToolInfo>;

    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// A message observed by an adapter, delivered into the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
}
