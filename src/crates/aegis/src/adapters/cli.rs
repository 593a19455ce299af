//! CLI adapter: stdout delivery, stdin observation.
//!
//! Outbound messages print with a channel prefix. Inbound stdin lines are
//! forwarded as incoming messages on the home channel; the runtime turns
//! them into tasks (or guidance when they target the deferral channel
//! with a thought tag).

use super::{Adapter, AdapterServiceRegistration};
use engine::buses::capabilities;
use engine::error::Result;
use engine::registry::ProviderHandle;
use engine::schemas::ChannelContext;
use engine::services::{CommunicationService, IncomingMessage};
use engine::shutdown::ShutdownCoordinator;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Communication service printing to stdout
pub struct CliCommunication {
    home_channel: String,
    deferral_channel: String,
}

#[async_trait]
impl CommunicationService for CliCommunication {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        println!("[{}] {}", channel_id, content);
        Ok(())
    }

    fn channel_list(&self) -> Vec<ChannelContext> {
        vec![
            ChannelContext::new(&self.home_channel).with_adapter("cli"),
            ChannelContext::new(&self.deferral_channel).with_adapter("cli"),
        ]
    }
}

/// The CLI adapter
pub struct CliAdapter {
    home_channel: String,
    deferral_channel: String,
    comm: Arc<CliCommunication>,
    inbound: UnboundedSender<IncomingMessage>,
    /// When false, stdin is not read (service-only mode for tests)
    interactive: bool,
}

impl CliAdapter {
    pub fn new(
        home_channel: impl Into<String>,
        deferral_channel: impl Into<String>,
        inbound: UnboundedSender<IncomingMessage>,
        interactive: bool,
    ) -> Self {
        let home_channel = home_channel.into();
        let deferral_channel = deferral_channel.into();
        Self {
            comm: Arc::new(CliCommunication {
                home_channel: home_channel.clone(),
                deferral_channel: deferral_channel.clone(),
            }),
            home_channel,
            deferral_channel,
            inbound,
            interactive,
        }
    }
}

#[async_trait]
impl Adapter for CliAdapter {
    fn kind(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<()> {
        info!(home = %self.home_channel, "CLI adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("CLI adapter stopped");
        Ok(())
    }

    async fn run_lifecycle(&self, shutdown: ShutdownCoordinator) -> Result<()> {
        if !self.interactive {
            shutdown.wait_for_shutdown().await;
            return Ok(());
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(content)) if !content.trim().is_empty() => {
                            debug!(content = %content, "CLI input observed");
                            let message = IncomingMessage {
                                channel_id: self.home_channel.clone(),
                                author_id: "cli-user".to_string(),
                                author_name: "CLI User".to_string(),
                                content,
                            };
                            if self.inbound.send(message).is_err() {
                                break;
                            }
                        }
                        Ok(Some(_)) => {}
                        // EOF or read error ends the lifecycle
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        Ok(())
    }

    fn get_services_to_register(&self) -> Vec<AdapterServiceRegistration> {
        vec![AdapterServiceRegistration {
            name: "cli".to_string(),
            priority: 0,
            capabilities: vec![capabilities::SEND_MESSAGE.to_string()],
            provider: ProviderHandle::Communication(self.comm.clone()),
        }]
    }

    fn get_channel_list(&self) -> Vec<ChannelContext> {
        self.comm.channel_list()
    }

    fn get_channel_info(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("adapter".to_string(), "cli".to_string()),
            ("home_channel".to_string(), self.home_channel.clone()),
            ("deferral_channel".to_string(), self.deferral_channel.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_registers_communication_service() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = CliAdapter::new("cli", "cli-deferral", tx, false);

        let registrations = adapter.get_services_to_register();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].name, "cli");
        assert!(registrations[0]
            .capabilities
            .contains(&capabilities::SEND_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_lifecycle_exits_on_shutdown() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = CliAdapter::new("cli", "cli-deferral", tx, false);
        let shutdown = ShutdownCoordinator::new();

        shutdown.request_shutdown("test");
        tokio::time::timeout(
            std::time::Duration::from_millis(100),
            adapter.run_lifecycle(shutdown),
        )
        .await
        .expect("lifecycle should exit promptly")
        .unwrap();
    }

    #[tokio::test]
    async fn test_channel_info_describes_channels() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = CliAdapter::new("lobby", "lobby-deferral", tx, false);

        let info = adapter.get_channel_info();
        assert_eq!(info["home_channel"], "lobby");
        assert_eq!(info["deferral_channel"], "lobby-deferral");
        assert_eq!(adapter.get_channel_list().len(), 2);
    }
}
