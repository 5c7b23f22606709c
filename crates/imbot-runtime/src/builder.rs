//! Bot Builder API
//!
//! Assembles a [`Bot`] from an account and configuration. Every collaborator
//! (connector, secrets store, login solver, codec registry, dispatcher) can
//! be replaced; tests swap in the in-memory network this way.

use std::sync::Arc;

use imbot_core::account::{Account, DeviceInfo};
use imbot_core::config::BotConfiguration;
use imbot_core::errors::Result;
use imbot_core::protocol::PacketCodecRegistry;
use imbot_core::transport::Connector;
use tracing::info;

use crate::bot::Bot;
use crate::components::{AccountSecretsStore, EventLoginSolver, InMemorySecretsStore, LoginSolver};
use crate::context::BotContext;
use crate::dispatcher::EventDispatcher;
use crate::tcp::TcpConnector;

// ----------------------------------------------------------------------------
// Bot Builder
// ----------------------------------------------------------------------------

pub struct BotBuilder {
    account: Account,
    config: BotConfiguration,
    device: Option<DeviceInfo>,
    connector: Option<Arc<dyn Connector>>,
    secrets: Option<Arc<dyn AccountSecretsStore>>,
    solver: Option<Arc<dyn LoginSolver>>,
    registry: Option<Arc<PacketCodecRegistry>>,
    events: Option<EventDispatcher>,
}

impl BotBuilder {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            config: BotConfiguration::default(),
            device: None,
            connector: None,
            secrets: None,
            solver: None,
            registry: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: BotConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Device identity; a random one is generated when unset
    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = Some(device);
        self
    }

    /// How connections are opened; plain TCP when unset
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_secrets_store(mut self, secrets: Arc<dyn AccountSecretsStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Verification answers; `VerificationRequired` events when unset
    pub fn with_login_solver(mut self, solver: Arc<dyn LoginSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn with_registry(mut self, registry: Arc<PacketCodecRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a dispatcher, e.g. to subscribe before the bot exists
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and assemble the bot; nothing connects yet
    pub fn build(self) -> Result<Bot> {
        self.config.validate()?;

        let events = self.events.unwrap_or_default();
        let solver = self.solver.unwrap_or_else(|| {
            Arc::new(EventLoginSolver::new(
                events.clone(),
                self.config.timeouts.verification,
            ))
        });
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(self.config.timeouts.connect)));
        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(InMemorySecretsStore::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(PacketCodecRegistry::with_default_commands()));
        let device = self.device.unwrap_or_else(DeviceInfo::random);

        info!(
            uin = self.account.uin,
            protocol = ?self.config.protocol,
            servers = self.config.servers.len(),
            "Building bot"
        );
        let context = BotContext::new(
            self.config,
            self.account,
            device,
            registry,
            events,
            secrets,
            solver,
            connector,
        );
        Ok(Bot::from_context(Arc::new(context)))
    }
}
