//! Adapter contract and the built-in CLI adapter.
//!
//! Adapters connect the core to the outside world. Each one starts and
//! stops with the runtime, runs a lifecycle task for the duration of the
//! agent's life, and registers the services it provides (communication,
//! tools) into the service registry.

mod cli;

pub use cli::CliAdapter;

use engine::error::Result;
use engine::registry::ProviderHandle;
use engine::schemas::ChannelContext;
use engine::shutdown::ShutdownCoordinator;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A service an adapter contributes to the registry
pub struct AdapterServiceRegistration {
    pub name: String,
    pub priority: u8,
    pub capabilities: Vec<String>,
    pub provider: ProviderHandle,
}

/// Host-provided adapter contract
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter kind ("cli", "api", ...)
    fn kind(&self) -> &str;

    /// Establish connections and become ready to deliver
    async fn start(&self) -> Result<()>;

    /// Tear down connections
    async fn stop(&self) -> Result<()>;

    /// Long-running lifecycle: returns when the adapter is done or
    /// shutdown is requested
    async fn run_lifecycle(&self, shutdown: ShutdownCoordinator) -> Result<()>;

    /// Services to register into the registry once started
    fn get_services_to_register(&self) -> Vec<AdapterServiceRegistration>;

    /// Channels this adapter can deliver to
    fn get_channel_list(&self) -> Vec<ChannelContext>;

    /// Adapter-specific descriptive fields
    fn get_channel_info(&self) -> BTreeMap<String, String>;
}
