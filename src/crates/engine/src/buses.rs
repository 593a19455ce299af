//! Typed buses over the service registry.
//!
//! Handlers and the DMA pipeline never hold providers directly: every call
//! goes through the bus manager, which resolves a provider by capability,
//! wraps the call in the correlation middleware, and feeds the provider's
//! circuit breaker.

use crate::audit::AuditService;
use crate::error::{EngineError, Result};
use crate::memory::GraphMemory;
use crate::registry::{ProviderHandle, ServiceKind, ServiceRegistry};
use crate::services::{CommunicationService, ToolService};
use crate::telemetry::TelemetryService;
use llm::Message;
use std::sync::Arc;

/// Capability names used for lookup
pub mod capabilities {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const STRUCTURED_CALL: &str = "structured_call";
    pub const EXECUTE_TOOL: &str = "execute_tool";
}

/// Priority + breaker routed access to every external service
#[derive(Clone)]
pub struct BusManager {
    registry: Arc<ServiceRegistry>,
    telemetry: Arc<TelemetryService>,
}

impl BusManager {
    pub fn new(registry: Arc<ServiceRegistry>, telemetry: Arc<TelemetryService>) -> Self {
        Self { registry, telemetry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn telemetry(&self) -> &Arc<TelemetryService> {
        &self.telemetry
    }

    /// Whether any communication provider is currently available
    pub fn has_communication(&self) -> bool {
        self.registry
            .get(ServiceKind::Communication, Some(capabilities::SEND_MESSAGE))
            .is_some()
    }

    fn comm_provider(&self) -> Result<(String, Arc<dyn CommunicationService>)> {
        match self
            .registry
            .get_named(ServiceKind::Communication, Some(capabilities::SEND_MESSAGE))
        {
            Some((name, ProviderHandle::Communication(service))) => Ok((name, service)),
            _ => Err(EngineError::Dispatch(
                "no communication service available".to_string(),
            )),
        }
    }

    /// Send a message through the highest-priority communication provider
    pub async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        handler_name: &str,
    ) -> Result<()> {
        let (name, service) = self.comm_provider()?;

        let result = self
            .telemetry
            .instrument(
                ServiceKind::Communication.as_str(),
                handler_name,
                "send_message",
                serde_json::json!({ "channel_id": channel_id }),
                service.send_message(channel_id, content),
            )
            .await;

        match &result {
            Ok(_) => self.registry.record_success(ServiceKind::Communication, &name),
            Err(_) => self.registry.record_failure(ServiceKind::Communication, &name),
        }
        result
    }

    /// Structured LLM call routed through the registry
    pub async fn call_llm_structured(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
        handler_name: &str,
    ) -> Result<serde_json::Value> {
        let (name, client) = match self.registry.get_named(ServiceKind::Llm, None) {
            Some((name, ProviderHandle::Llm(client))) => (name, client),
            _ => return Err(EngineError::LlmTransport("no LLM service available".into())),
        };

        let result: std::result::Result<serde_json::Value, llm::LlmError> = self
            .telemetry
            .instrument(
                ServiceKind::Llm.as_str(),
                handler_name,
                "structured_call",
                serde_json::json!({ "messages": messages.len(), "max_tokens": max_tokens }),
                client.call_structured_value(messages, max_tokens, temperature),
            )
            .await;

        match &result {
            Ok(_) => self.registry.record_success(ServiceKind::Llm, &name),
            // Structured failures are the model's fault, not the provider's
            Err(llm::LlmError::Structured(_)) => {
                self.registry.record_success(ServiceKind::Llm, &name)
            }
            Err(_) => self.registry.record_failure(ServiceKind::Llm, &name),
        }

        result.map_err(Into::into)
    }

    fn tool_provider(&self) -> Result<(String, Arc<dyn ToolService>)> {
        match self
            .registry
            .get_named(ServiceKind::Tool, Some(capabilities::EXECUTE_TOOL))
        {
            Some((name, ProviderHandle::Tool(service))) => Ok((name, service)),
            _ => Err(EngineError::Dispatch("no tool service available".to_string())),
        }
    }

    /// Execute a tool through the highest-priority tool provider
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        handler_name: &str,
    ) -> Result<serde_json::Value> {
        let (name, service) = self.tool_provider()?;

        let result = self
            .telemetry
            .instrument(
                ServiceKind::Tool.as_str(),
                handler_name,
                "execute_tool",
                serde_json::json!({ "tool_name": tool_name }),
                service.execute_tool(tool_name, arguments),
            )
            .await;

        match &result {
            Ok(_) => self.registry.record_success(ServiceKind::Tool, &name),
            Err(_) => self.registry.record_failure(ServiceKind::Tool, &name),
        }
        result
    }

    /// Tools available across all registered tool providers
    pub async fn available_tools(&self) -> Vec<String> {
        match self.registry.get(ServiceKind::Tool, None) {
            Some(ProviderHandle::Tool(service)) => service.available_tools().await,
            _ => Vec::new(),
        }
    }

    /// The graph memory service
    pub fn memory(&self) -> Result<Arc<GraphMemory>> {
        match self.registry.get(ServiceKind::Memory, None) {
            Some(ProviderHandle::Memory(memory)) => Ok(memory),
            _ => Err(EngineError::Dispatch("no memory service available".into())),
        }
    }

    /// The audit service
    pub fn audit(&self) -> Result<Arc<AuditService>> {
        match self.registry.get(ServiceKind::Audit, None) {
            Some(ProviderHandle::Audit(audit)) => Ok(audit),
            _ => Err(EngineError::Dispatch("no audit service available".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};
    use crate::schemas::ChannelContext;
    use async_trait::async_trait;
    use llm::providers::MockLlmClient;
    use parking_lot::Mutex;

    struct RecordingComm {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CommunicationService for RecordingComm {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
            self.sent
                .lock()
                .push((channel_id.to_string(), content.to_string()));
            Ok(())
        }

        fn channel_list(&self) -> Vec<ChannelContext> {
            vec![ChannelContext::new("test")]
        }
    }

    async fn bus_with_comm() -> (BusManager, Arc<RecordingComm>) {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let telemetry = Arc::new(TelemetryService::new(
            db,
            Arc::new(FixedClock::default_start()),
        ));
        let registry = Arc::new(ServiceRegistry::new());
        let comm = Arc::new(RecordingComm {
            sent: Mutex::new(Vec::new()),
        });
        registry.register(
            "recording",
            0,
            vec![capabilities::SEND_MESSAGE.to_string()],
            ProviderHandle::Communication(comm.clone()),
        );
        (BusManager::new(registry, telemetry), comm)
    }

    #[tokio::test]
    async fn test_send_message_records_correlation() {
        let (bus, comm) = bus_with_comm().await;

        bus.send_message("chan", "hello", "speak_handler").await.unwrap();

        assert_eq!(comm.sent.lock().as_slice(), &[("chan".into(), "hello".into())]);
        let recent = bus.telemetry().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action_type, "send_message");
    }

    #[tokio::test]
    async fn test_missing_comm_is_dispatch_error() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let telemetry = Arc::new(TelemetryService::new(
            db,
            Arc::new(FixedClock::default_start()),
        ));
        let bus = BusManager::new(Arc::new(ServiceRegistry::new()), telemetry);

        let err = bus.send_message("chan", "x", "h").await.unwrap_err();
        assert!(matches!(err, EngineError::Dispatch(_)));
        assert!(!bus.has_communication());
    }

    #[tokio::test]
    async fn test_llm_call_through_bus() {
        let (bus, _) = bus_with_comm().await;
        let mock = Arc::new(MockLlmClient::new());
        bus.registry().register(
            "mock",
            0,
            vec![capabilities::STRUCTURED_CALL.to_string()],
            ProviderHandle::Llm(mock.clone()),
        );

        let value = bus
            .call_llm_structured(&[Message::user("pick an action")], 256, 0.0, "dma")
            .await
            .unwrap();
        assert_eq!(value["selected_action"], "speak");
        assert_eq!(mock.call_count(), 1);
    }
}
