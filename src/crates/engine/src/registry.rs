//! Service registry (C5): capability-indexed lookup with priority routing
//! and per-provider circuit breakers.
//!
//! Registrations happen during initialization and on adapter load/unload;
//! lookups happen on every dispatch, so the registry is read-mostly
//! behind a parking_lot RwLock.

use crate::audit::AuditService;
use crate::memory::GraphMemory;
use crate::secrets::SecretsFilter;
use crate::services::{CommunicationService, ToolService};
use crate::telemetry::TelemetryService;
use llm::LlmClient;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Kind of service a provider fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Llm,
    Memory,
    Audit,
    Communication,
    Tool,
    Telemetry,
    Secrets,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Memory => "memory",
            Self::Audit => "audit",
            Self::Communication => "communication",
            Self::Tool => "tool",
            Self::Telemetry => "telemetry",
            Self::Secrets => "secrets",
        }
    }
}

/// Type-safe handle to a registered provider
#[derive(Clone)]
pub enum ProviderHandle {
    Llm(Arc<dyn LlmClient>),
    Memory(Arc<GraphMemory>),
    Audit(Arc<AuditService>),
    Communication(Arc<dyn CommunicationService>),
    Tool(Arc<dyn ToolService>),
    Telemetry(Arc<TelemetryService>),
    Secrets(Arc<SecretsFilter>),
}

impl ProviderHandle {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Llm(_) => ServiceKind::Llm,
            Self::Memory(_) => ServiceKind::Memory,
            Self::Audit(_) => ServiceKind::Audit,
            Self::Communication(_) => ServiceKind::Communication,
            Self::Tool(_) => ServiceKind::Tool,
            Self::Telemetry(_) => ServiceKind::Telemetry,
            Self::Secrets(_) => ServiceKind::Secrets,
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Per-provider circuit breaker
///
/// Consecutive failures open the breaker; after the cool-down the next
/// lookup gets a half-open probe.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold,
            cooldown,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a call may pass; moves OPEN → HALF_OPEN after cool-down
    pub fn check_available(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if now.duration_since(opened_at) >= self.cooldown {
                        self.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    pub fn on_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.failure_threshold
        {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

struct Registration {
    name: String,
    priority: u8,
    capabilities: Vec<String>,
    breaker: CircuitBreaker,
    provider: ProviderHandle,
}

/// Capability-indexed service registry
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<HashMap<ServiceKind, Vec<Registration>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; lower priority value wins at lookup
    pub fn register(
        &self,
        name: impl Into<String>,
        priority: u8,
        capabilities: Vec<String>,
        provider: ProviderHandle,
    ) {
        let name = name.into();
        let kind = provider.kind();
        info!(kind = kind.as_str(), name = %name, priority, "Registering service provider");

        let mut inner = self.inner.write();
        let entries = inner.entry(kind).or_default();
        entries.push(Registration {
            name,
            priority,
            capabilities,
            breaker: CircuitBreaker::default(),
            provider,
        });
        entries.sort_by_key(|r| r.priority);
    }

    /// Resolve a provider by kind and (optionally) required capability
    ///
    /// Providers are considered in priority order; ones with an open
    /// breaker are skipped until their cool-down elapses.
    pub fn get(&self, kind: ServiceKind, capability: Option<&str>) -> Option<ProviderHandle> {
        self.get_named(kind, capability).map(|(_, handle)| handle)
    }

    /// Like [`ServiceRegistry::get`], also returning the provider's name
    pub fn get_named(
        &self,
        kind: ServiceKind,
        capability: Option<&str>,
    ) -> Option<(String, ProviderHandle)> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let entries = inner.get_mut(&kind)?;

        for registration in entries.iter_mut() {
            if let Some(cap) = capability {
                if !registration.capabilities.iter().any(|c| c == cap) {
                    continue;
                }
            }
            if registration.breaker.check_available(now) {
                debug!(
                    kind = kind.as_str(),
                    name = %registration.name,
                    "Selected service provider"
                );
                return Some((registration.name.clone(), registration.provider.clone()));
            }
        }

        warn!(kind = kind.as_str(), capability, "No available service provider");
        None
    }

    /// Record a successful call against a provider's breaker
    pub fn record_success(&self, kind: ServiceKind, name: &str) {
        let mut inner = self.inner.write();
        if let Some(entries) = inner.get_mut(&kind) {
            if let Some(reg) = entries.iter_mut().find(|r| r.name == name) {
                reg.breaker.on_success();
            }
        }
    }

    /// Record a failed call against a provider's breaker
    pub fn record_failure(&self, kind: ServiceKind, name: &str) {
        let mut inner = self.inner.write();
        if let Some(entries) = inner.get_mut(&kind) {
            if let Some(reg) = entries.iter_mut().find(|r| r.name == name) {
                reg.breaker.on_failure(Instant::now());
                if reg.breaker.state() == CircuitState::Open {
                    warn!(kind = kind.as_str(), name = %reg.name, "Circuit breaker opened");
                }
            }
        }
    }

    /// Healthy flag per provider ("kind/name" keys)
    pub fn health(&self) -> BTreeMap<String, bool> {
        let inner = self.inner.read();
        inner
            .iter()
            .flat_map(|(kind, entries)| {
                entries.iter().map(move |r| {
                    (
                        format!("{}/{}", kind.as_str(), r.name),
                        r.breaker.state() != CircuitState::Open,
                    )
                })
            })
            .collect()
    }

    /// Breaker state per provider ("kind/name" keys)
    pub fn breaker_states(&self) -> BTreeMap<String, String> {
        let inner = self.inner.read();
        inner
            .iter()
            .flat_map(|(kind, entries)| {
                entries.iter().map(move |r| {
                    (
                        format!("{}/{}", kind.as_str(), r.name),
                        r.breaker.state().as_str().to_string(),
                    )
                })
            })
            .collect()
    }

    pub fn provider_count(&self) -> usize {
        self.inner.read().values().map(Vec::len).sum()
    }

    pub fn capability_count(&self) -> usize {
        self.inner
            .read()
            .values()
            .flat_map(|entries| entries.iter().map(|r| r.capabilities.len()))
            .sum()
    }

    /// Remove every registration (final step of shutdown)
    pub fn clear(&self) {
        self.inner.write().clear();
        info!("Service registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::ChannelContext;
    use async_trait::async_trait;

    struct NullComm(&'static str);

    #[async_trait]
    impl CommunicationService for NullComm {
        fn name(&self) -> &str {
            self.0
        }

        async fn send_message(&self, _channel_id: &str, _content: &str) -> crate::Result<()> {
            Ok(())
        }

        fn channel_list(&self) -> Vec<ChannelContext> {
            vec![ChannelContext::new("null")]
        }
    }

    fn comm(name: &'static str) -> ProviderHandle {
        ProviderHandle::Communication(Arc::new(NullComm(name)))
    }

    #[test]
    fn test_priority_routing() {
        let registry = ServiceRegistry::new();
        registry.register("backup", 10, vec!["send_message".into()], comm("backup"));
        registry.register("primary", 0, vec!["send_message".into()], comm("primary"));

        let (name, _) = registry
            .get_named(ServiceKind::Communication, Some("send_message"))
            .unwrap();
        assert_eq!(name, "primary");
    }

    #[test]
    fn test_capability_filter() {
        let registry = ServiceRegistry::new();
        registry.register("no_cap", 0, vec![], comm("no_cap"));

        assert!(registry
            .get(ServiceKind::Communication, Some("send_message"))
            .is_none());
        assert!(registry.get(ServiceKind::Communication, None).is_some());
    }

    #[test]
    fn test_breaker_opens_after_consecutive_failures() {
        let registry = ServiceRegistry::new();
        registry.register("only", 0, vec!["send_message".into()], comm("only"));

        for _ in 0..5 {
            registry.record_failure(ServiceKind::Communication, "only");
        }

        assert!(registry
            .get(ServiceKind::Communication, Some("send_message"))
            .is_none());
        let states = registry.breaker_states();
        assert_eq!(states["communication/only"], "open");
        assert_eq!(registry.health()["communication/only"], false);
    }

    #[test]
    fn test_breaker_success_resets_failures() {
        let registry = ServiceRegistry::new();
        registry.register("only", 0, vec![], comm("only"));

        for _ in 0..4 {
            registry.record_failure(ServiceKind::Communication, "only");
        }
        registry.record_success(ServiceKind::Communication, "only");
        for _ in 0..4 {
            registry.record_failure(ServiceKind::Communication, "only");
        }

        // Never reached five consecutive failures
        assert!(registry.get(ServiceKind::Communication, None).is_some());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        let now = Instant::now();

        breaker.on_failure(now);
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero cool-down: next check probes half-open
        assert!(breaker.check_available(now + Duration::from_millis(1)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A half-open failure reopens immediately
        breaker.on_failure(now + Duration::from_millis(2));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = ServiceRegistry::new();
        registry.register("only", 0, vec![], comm("only"));
        assert_eq!(registry.provider_count(), 1);

        registry.clear();
        assert_eq!(registry.provider_count(), 0);
        assert!(registry.get(ServiceKind::Communication, None).is_none());
    }
}
