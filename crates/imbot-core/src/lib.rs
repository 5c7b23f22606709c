//! imbot Core Protocol Implementation
//!
//! This crate provides the I/O-free part of the imbot instant-messaging client:
//! the error taxonomy and configuration, TEA and ECDH primitives, the packet
//! model with its codec registry, the SSO session processor, the message
//! protocol pipeline and the domain events the runtime publishes.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod account;
pub mod config;
pub mod crypto;
pub mod deferred;
pub mod errors;
pub mod events;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod utils;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use account::{Account, AccountSecrets, Credentials, DeviceInfo};
pub use config::{BotConfiguration, HeartbeatKind, HeartbeatStrategy, Protocol, ServerAddress};
pub use deferred::Deferred;
pub use errors::{
    ImbotError, ImbotResult, LoginError, MessageError, PacketError, RegistryError, Result,
    SessionError, SharedError, TransportError,
};
pub use events::{BotEvent, EventKind, VerificationAnswer, VerificationChallenge};
pub use message::{MessageChain, MessageProtocolFacade, MessageSource, MessageTarget, SingleMessage};
pub use protocol::{
    CloseReason, HandlerState, OutgoingRequest, Packet, PacketCodecRegistry, PacketPayload,
    SsoProcessor, SyncingCacheList,
};
pub use transport::{Connector, Transport};
pub use types::{GroupCode, SequenceId, Timestamp, Uin};
pub use utils::ip_to_long;
