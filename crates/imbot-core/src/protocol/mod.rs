//! Wire protocol: byte utilities, packet model, codecs and session processing

pub mod cache;
pub mod codec;
pub mod commands;
pub mod connection_state;
pub mod io;
pub mod packet;
pub mod sso;
pub mod tlv;
pub mod wire;

pub use cache::{CacheStats, SyncingCacheList};
pub use codec::{PacketCodecRegistry, PacketDecoder};
pub use connection_state::{CloseReason, HandlerEvent, HandlerState, StateTransitionError};
pub use packet::{EncodedFrame, OutgoingRequest, Packet, PacketFlags, PacketKind, PacketPayload};
pub use sso::{AuthEvent, AuthState, Routed, SsoProcessor, WrappedRequest};
