//! imbot Runtime Engine
//!
//! This crate drives the protocol engine from `imbot-core` on tokio:
//! - `NetworkHandler`: one connection, one session, one lifecycle
//! - `NetworkHandlerSelector`: replaces dead handlers with backoff
//! - `EventDispatcher`: prioritised, cancellable event delivery
//! - Login, heartbeat, key refresh and push handling components
//! - `Bot`: the outbound API applications use

pub mod bot;
pub mod builder;
pub mod components;
pub mod contacts;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod selector;
pub mod supervisor;
pub mod tcp;

pub use bot::{Bot, MessageReceipt};
pub use builder::BotBuilder;
pub use components::{
    AccountSecretsStore, EventLoginSolver, InMemorySecretsStore, LoginSolver,
    UnsupportedLoginSolver,
};
pub use contacts::{ContactRegistry, Friend, Group, Member};
pub use context::BotContext;
pub use dispatcher::{
    EventDispatcher, EventEnvelope, EventFilter, EventPriority, ListenerHandle, ListenerScope,
    ListeningStatus,
};
pub use handler::{NetworkHandler, SendOptions};
pub use selector::NetworkHandlerSelector;
pub use supervisor::KeepAliveSupervisor;
pub use tcp::{TcpConnector, TcpTransport};

// Re-export core types for convenience
pub use imbot_core::{
    Account, BotConfiguration, BotEvent, CloseReason, Credentials, DeviceInfo, EventKind,
    HandlerState, ImbotError, MessageChain, MessageSource, MessageTarget, Result, SharedError,
    VerificationAnswer, VerificationChallenge,
};
