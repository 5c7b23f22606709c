//! Packet model
//!
//! [`Packet`] is what the codec registry produces for every incoming frame, and
//! [`OutgoingRequest`] is what application code hands to the codec for sending.

use core::fmt;
use serde::Serialize;

use crate::errors::{ImbotError, Result};
use crate::protocol::commands::config_push::ConfigPushRequest;
use crate::protocol::commands::friendlist::{
    FriendListResponse, GroupListResponse, MemberListResponse,
};
use crate::protocol::commands::login::LoginResponse;
use crate::protocol::commands::message_svc::{
    ForceOfflinePush, GetMessageResponse, PushNotify, RecallResponse, SendMessageResponse,
};
use crate::protocol::commands::online_push::{GroupMessagePush, OnlinePushRequest};
use crate::protocol::commands::stat_svc::{
    AliveResponse, MsfOfflinePush, RegisterResponse, SimpleGetResponse,
};
use crate::types::{SequenceId, Timestamp};

// ----------------------------------------------------------------------------
// Packet Flags
// ----------------------------------------------------------------------------

/// Logging behaviour attached to a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    /// Never log the packet itself
    pub no_log: bool,
    /// Never log the event produced from the packet
    pub no_event_log: bool,
}

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags {
        no_log: false,
        no_event_log: false,
    };

    pub const NO_LOG: PacketFlags = PacketFlags {
        no_log: true,
        no_event_log: false,
    };

    pub const NO_EVENT_LOG: PacketFlags = PacketFlags {
        no_log: false,
        no_event_log: true,
    };
}

/// How an incoming packet is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Reply to an outstanding request, matched by sequence and command
    Response,
    /// Server-initiated
    Push,
    /// No decoder registered for the command
    Unknown,
}

// ----------------------------------------------------------------------------
// Decoded Payloads
// ----------------------------------------------------------------------------

/// Decoded packet body
#[derive(Debug, Clone)]
pub enum PacketPayload {
    Login(LoginResponse),
    Register(RegisterResponse),
    SimpleGet(SimpleGetResponse),
    Alive(AliveResponse),
    FriendList(FriendListResponse),
    GroupList(GroupListResponse),
    MemberList(MemberListResponse),
    SendMessage(SendMessageResponse),
    GetMessage(GetMessageResponse),
    Recall(RecallResponse),
    PushNotify(PushNotify),
    GroupMessage(GroupMessagePush),
    OnlinePush(OnlinePushRequest),
    ForceOffline(ForceOfflinePush),
    MsfOffline(MsfOfflinePush),
    ConfigPush(ConfigPushRequest),
    /// Command has no registered decoder; raw bytes are kept on the packet
    Unknown,
    /// Decoder rejected the body
    Malformed { reason: String },
}

impl PacketPayload {
    pub fn name(&self) -> &'static str {
        match self {
            PacketPayload::Login(_) => "Login",
            PacketPayload::Register(_) => "Register",
            PacketPayload::SimpleGet(_) => "SimpleGet",
            PacketPayload::Alive(_) => "Alive",
            PacketPayload::FriendList(_) => "FriendList",
            PacketPayload::GroupList(_) => "GroupList",
            PacketPayload::MemberList(_) => "MemberList",
            PacketPayload::SendMessage(_) => "SendMessage",
            PacketPayload::GetMessage(_) => "GetMessage",
            PacketPayload::Recall(_) => "Recall",
            PacketPayload::PushNotify(_) => "PushNotify",
            PacketPayload::GroupMessage(_) => "GroupMessage",
            PacketPayload::OnlinePush(_) => "OnlinePush",
            PacketPayload::ForceOffline(_) => "ForceOffline",
            PacketPayload::MsfOffline(_) => "MsfOffline",
            PacketPayload::ConfigPush(_) => "ConfigPush",
            PacketPayload::Unknown => "Unknown",
            PacketPayload::Malformed { .. } => "Malformed",
        }
    }
}

// ----------------------------------------------------------------------------
// Incoming Packet
// ----------------------------------------------------------------------------

/// Decoded incoming packet; immutable once built
#[derive(Debug, Clone)]
pub struct Packet {
    pub command: String,
    pub sequence: SequenceId,
    /// Raw body as received after decryption and decompression
    pub body: Vec<u8>,
    pub payload: PacketPayload,
    pub kind: PacketKind,
    pub flags: PacketFlags,
    pub decoded_at: Timestamp,
}

impl Packet {
    pub fn is_unknown(&self) -> bool {
        matches!(self.payload, PacketPayload::Unknown)
    }

    /// Payload, or an error if the decoder rejected the body
    pub fn into_payload(self) -> Result<PacketPayload> {
        match self.payload {
            PacketPayload::Malformed { reason } => {
                Err(ImbotError::decode_failed(self.command, reason))
            }
            payload => Ok(payload),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} ({}, {} bytes)",
            self.command,
            self.sequence,
            self.payload.name(),
            self.body.len()
        )
    }
}

// ----------------------------------------------------------------------------
// Outgoing Request
// ----------------------------------------------------------------------------

/// Outer frame type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Login traffic, carries an OICQ envelope
    Login = 0x0A,
    /// Application traffic
    Uni = 0x0B,
}

impl FrameKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0A => Some(FrameKind::Login),
            0x0B => Some(FrameKind::Uni),
            _ => None,
        }
    }
}

/// Key the outer frame body is sealed with
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encryption {
    None = 0,
    /// Session key issued at login
    D2Key = 1,
    /// All-zero key, used before a session key exists
    EmptyKey = 2,
}

impl Encryption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Encryption::None),
            1 => Some(Encryption::D2Key),
            2 => Some(Encryption::EmptyKey),
            _ => None,
        }
    }
}

/// Serializes a request body
pub trait EncodeBody: Send + Sync {
    fn encode_body(&self) -> Result<Vec<u8>>;
}

/// Body serialized with bincode
pub struct SerdeBody<T>(pub T);

impl<T: Serialize + Send + Sync> EncodeBody for SerdeBody<T> {
    fn encode_body(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.0)?)
    }
}

/// Pre-encoded body
pub struct RawBody(pub Vec<u8>);

impl EncodeBody for RawBody {
    fn encode_body(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Request handed to the codec; the sequence is bound by the session at send time
pub struct OutgoingRequest {
    pub command: String,
    pub kind: FrameKind,
    pub encryption: Encryption,
    /// Wrap the body in the login envelope
    pub oicq: bool,
    pub expects_response: bool,
    pub flags: PacketFlags,
    body: Box<dyn EncodeBody>,
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("command", &self.command)
            .field("kind", &self.kind)
            .field("encryption", &self.encryption)
            .field("oicq", &self.oicq)
            .field("expects_response", &self.expects_response)
            .finish()
    }
}

impl OutgoingRequest {
    /// Application request with a bincode body, sealed with the session key
    pub fn uni<C, T>(command: C, body: T) -> Self
    where
        C: Into<String>,
        T: Serialize + Send + Sync + 'static,
    {
        Self {
            command: command.into(),
            kind: FrameKind::Uni,
            encryption: Encryption::D2Key,
            oicq: false,
            expects_response: true,
            flags: PacketFlags::NONE,
            body: Box::new(SerdeBody(body)),
        }
    }

    /// Login request; `tlv_body` is wrapped in the login envelope by the session
    pub fn login<C: Into<String>>(command: C, tlv_body: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            kind: FrameKind::Login,
            encryption: Encryption::EmptyKey,
            oicq: true,
            expects_response: true,
            flags: PacketFlags::NONE,
            body: Box::new(RawBody(tlv_body)),
        }
    }

    /// Fire-and-forget request (acks)
    pub fn without_response(mut self) -> Self {
        self.expects_response = false;
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn encode_body(&self) -> Result<Vec<u8>> {
        self.body.encode_body()
    }
}

// ----------------------------------------------------------------------------
// Encoded Frame
// ----------------------------------------------------------------------------

/// Header of an encoded request; the sequence stays a placeholder until wrapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub command: String,
    pub sequence: SequenceId,
}

/// Codec output, input of the session wrapper
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub header: FrameHeader,
    pub encryption: Encryption,
    pub oicq: bool,
    pub expects_response: bool,
    pub flags: PacketFlags,
    pub body: Vec<u8>,
}
