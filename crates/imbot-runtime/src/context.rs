//! Bot Context
//!
//! Everything that outlives a single network handler: configuration, account,
//! codec registry, message pipeline, contacts, event dispatcher and the
//! duplicate suppression caches. Handlers borrow it through an `Arc`.

use std::sync::{Arc, RwLock};

use imbot_core::account::{Account, DeviceInfo};
use imbot_core::config::{BotConfiguration, CacheConfig, ServerAddress};
use imbot_core::message::MessageProtocolFacade;
use imbot_core::protocol::{CloseReason, PacketCodecRegistry, SyncingCacheList};
use imbot_core::transport::Connector;
use imbot_core::types::{GroupCode, Uin};
use tracing::info;

use crate::components::login::LoginSolver;
use crate::components::packet_logger::PacketLogger;
use crate::components::secrets::AccountSecretsStore;
use crate::contacts::ContactRegistry;
use crate::dispatcher::EventDispatcher;

// ----------------------------------------------------------------------------
// Message Caches
// ----------------------------------------------------------------------------

/// Recently seen message identities, shared by every handler of a bot
pub struct MessageCaches {
    /// (sender, sequence, random)
    pub friend_messages: SyncingCacheList<(Uin, u32, u32)>,
    /// (group, sequence, random)
    pub group_messages: SyncingCacheList<(GroupCode, u32, u32)>,
    pub online_push: SyncingCacheList<(Uin, u32, u64)>,
}

impl MessageCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            friend_messages: SyncingCacheList::new(config.friend_messages),
            group_messages: SyncingCacheList::new(config.group_messages),
            online_push: SyncingCacheList::new(config.online_push),
        }
    }
}

// ----------------------------------------------------------------------------
// Bot Context
// ----------------------------------------------------------------------------

pub struct BotContext {
    pub config: BotConfiguration,
    pub account: Account,
    pub device: DeviceInfo,
    pub registry: Arc<PacketCodecRegistry>,
    pub messages: Arc<MessageProtocolFacade>,
    pub events: EventDispatcher,
    pub contacts: Arc<ContactRegistry>,
    pub secrets: Arc<dyn AccountSecretsStore>,
    pub solver: Arc<dyn LoginSolver>,
    pub connector: Arc<dyn Connector>,
    pub caches: MessageCaches,
    pub logger: PacketLogger,
    servers: RwLock<Vec<ServerAddress>>,
    sync_cookie: RwLock<Vec<u8>>,
}

impl BotContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfiguration,
        account: Account,
        device: DeviceInfo,
        registry: Arc<PacketCodecRegistry>,
        events: EventDispatcher,
        secrets: Arc<dyn AccountSecretsStore>,
        solver: Arc<dyn LoginSolver>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let messages = Arc::new(MessageProtocolFacade::new(config.precedence.clone()));
        let caches = MessageCaches::new(&config.caches);
        let logger = PacketLogger::new(config.packet_debug);
        let servers = RwLock::new(config.servers.clone());
        Self {
            config,
            account,
            device,
            registry,
            messages,
            events,
            contacts: Arc::new(ContactRegistry::new()),
            secrets,
            solver,
            connector,
            caches,
            logger,
            servers,
            sync_cookie: RwLock::new(Vec::new()),
        }
    }

    pub fn uin(&self) -> Uin {
        self.account.uin
    }

    /// Servers in the order the next connection should try them
    pub fn servers(&self) -> Vec<ServerAddress> {
        self.servers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the server list with one pushed by the server; empty lists are ignored
    pub fn update_servers(&self, servers: Vec<ServerAddress>) {
        if servers.is_empty() {
            return;
        }
        info!(uin = self.uin(), count = servers.len(), "Server list updated");
        *self
            .servers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = servers;
    }

    pub fn sync_cookie(&self) -> Vec<u8> {
        self.sync_cookie
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_sync_cookie(&self, cookie: Vec<u8>) {
        *self
            .sync_cookie
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = cookie;
    }

    /// Whether a handler closed for `reason` should be replaced
    pub fn reconnect_allowed(&self, reason: &CloseReason) -> bool {
        reason.is_recoverable(self.config.auto_reconnect_on_force_offline)
    }
}
