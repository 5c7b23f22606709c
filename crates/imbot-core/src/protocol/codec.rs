//! Packet codec registry
//!
//! Maps command names to decoders. Decoding never fails: an unregistered
//! command produces an `Unknown` payload that keeps the raw bytes, and a body
//! the decoder rejects produces a `Malformed` payload. The registry holds no
//! per-connection state and is shared across connections behind an `Arc`.

use core::marker::PhantomData;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::{RegistryError, Result};
use crate::protocol::commands::{self, login::LoginResponse};
use crate::protocol::packet::{
    EncodedFrame, FrameHeader, OutgoingRequest, Packet, PacketFlags, PacketKind, PacketPayload,
};
use crate::types::{SequenceId, Timestamp};

// ----------------------------------------------------------------------------
// Decoders
// ----------------------------------------------------------------------------

/// Turns the body of one command into a payload
pub trait PacketDecoder: Send + Sync {
    fn kind(&self) -> PacketKind;

    fn flags(&self) -> PacketFlags {
        PacketFlags::NONE
    }

    fn decode(&self, body: &[u8]) -> Result<PacketPayload>;
}

/// Decoder for bincode bodies
pub struct SerdeDecoder<T> {
    kind: PacketKind,
    flags: PacketFlags,
    wrap: fn(T) -> PacketPayload,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeDecoder<T> {
    pub fn new(kind: PacketKind, wrap: fn(T) -> PacketPayload) -> Self {
        Self {
            kind,
            flags: PacketFlags::NONE,
            wrap,
            _marker: PhantomData,
        }
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl<T: DeserializeOwned> PacketDecoder for SerdeDecoder<T> {
    fn kind(&self) -> PacketKind {
        self.kind
    }

    fn flags(&self) -> PacketFlags {
        self.flags
    }

    fn decode(&self, body: &[u8]) -> Result<PacketPayload> {
        let value: T = bincode::deserialize(body)?;
        Ok((self.wrap)(value))
    }
}

/// Decoder for `wtlogin.*` responses (already unwrapped from the login envelope)
pub struct LoginDecoder;

impl PacketDecoder for LoginDecoder {
    fn kind(&self) -> PacketKind {
        PacketKind::Response
    }

    fn flags(&self) -> PacketFlags {
        PacketFlags::NO_LOG
    }

    fn decode(&self, body: &[u8]) -> Result<PacketPayload> {
        Ok(PacketPayload::Login(LoginResponse::decode(body)?))
    }
}

fn response<T: DeserializeOwned + 'static>(wrap: fn(T) -> PacketPayload) -> Arc<dyn PacketDecoder> {
    Arc::new(SerdeDecoder::new(PacketKind::Response, wrap))
}

fn push<T: DeserializeOwned + 'static>(wrap: fn(T) -> PacketPayload) -> Arc<dyn PacketDecoder> {
    Arc::new(SerdeDecoder::new(PacketKind::Push, wrap))
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Command name to decoder table
#[derive(Clone, Default)]
pub struct PacketCodecRegistry {
    decoders: HashMap<String, Arc<dyn PacketDecoder>>,
}

impl core::fmt::Debug for PacketCodecRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut commands: Vec<&String> = self.decoders.keys().collect();
        commands.sort();
        f.debug_struct("PacketCodecRegistry")
            .field("commands", &commands)
            .finish()
    }
}

impl PacketCodecRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a decoder for every supported command
    pub fn with_default_commands() -> Self {
        use commands::*;

        let defaults: Vec<(&str, Arc<dyn PacketDecoder>)> = vec![
            (WTLOGIN_LOGIN, Arc::new(LoginDecoder)),
            (WTLOGIN_EXCHANGE_EMP, Arc::new(LoginDecoder)),
            (STAT_REGISTER, response(PacketPayload::Register)),
            (STAT_SIMPLE_GET, response(PacketPayload::SimpleGet)),
            (HEARTBEAT_ALIVE, response(PacketPayload::Alive)),
            (FRIEND_LIST, response(PacketPayload::FriendList)),
            (GROUP_LIST, response(PacketPayload::GroupList)),
            (MEMBER_LIST, response(PacketPayload::MemberList)),
            (PB_SEND_MSG, response(PacketPayload::SendMessage)),
            (
                PB_GET_MSG,
                Arc::new(
                    SerdeDecoder::new(PacketKind::Response, PacketPayload::GetMessage)
                        .with_flags(PacketFlags::NO_LOG),
                ),
            ),
            (PB_MSG_WITHDRAW, response(PacketPayload::Recall)),
            (PUSH_NOTIFY, push(PacketPayload::PushNotify)),
            (PUSH_GROUP_MSG, push(PacketPayload::GroupMessage)),
            (ONLINE_PUSH_REQ, push(PacketPayload::OnlinePush)),
            (
                PUSH_FORCE_OFFLINE,
                Arc::new(
                    SerdeDecoder::new(PacketKind::Push, PacketPayload::ForceOffline)
                        .with_flags(PacketFlags::NO_EVENT_LOG),
                ),
            ),
            (STAT_MSF_OFFLINE, push(PacketPayload::MsfOffline)),
            (CONFIG_PUSH_REQ, push(PacketPayload::ConfigPush)),
        ];

        let mut registry = Self::new();
        for (command, decoder) in defaults {
            registry.decoders.entry(command.to_string()).or_insert(decoder);
        }
        registry
    }

    /// Register a decoder; the first registration for a command wins
    pub fn register<C: Into<String>>(
        &mut self,
        command: C,
        decoder: Arc<dyn PacketDecoder>,
    ) -> Result<()> {
        let command = command.into();
        if self.decoders.contains_key(&command) {
            return Err(RegistryError::DuplicateDecoder { command }.into());
        }
        self.decoders.insert(command, decoder);
        Ok(())
    }

    pub fn contains(&self, command: &str) -> bool {
        self.decoders.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Routing of a command; `Unknown` if unregistered
    pub fn kind_of(&self, command: &str) -> PacketKind {
        self.decoders
            .get(command)
            .map_or(PacketKind::Unknown, |decoder| decoder.kind())
    }

    /// Decode a body by exact command name
    pub fn decode(&self, command: &str, sequence: SequenceId, body: Vec<u8>) -> Packet {
        let Some(decoder) = self.decoders.get(command) else {
            debug!(command, %sequence, len = body.len(), "Unknown packet");
            return Packet {
                command: command.to_string(),
                sequence,
                body,
                payload: PacketPayload::Unknown,
                kind: PacketKind::Unknown,
                flags: PacketFlags::NONE,
                decoded_at: Timestamp::now(),
            };
        };

        let payload = match decoder.decode(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(command, %sequence, error = %e, "Failed to decode packet body");
                PacketPayload::Malformed {
                    reason: e.to_string(),
                }
            }
        };

        Packet {
            command: command.to_string(),
            sequence,
            body,
            payload,
            kind: decoder.kind(),
            flags: decoder.flags(),
            decoded_at: Timestamp::now(),
        }
    }

    /// Encode a request into a frame whose sequence is still a placeholder
    pub fn encode(&self, request: &OutgoingRequest) -> Result<EncodedFrame> {
        if request.expects_response && !self.contains(&request.command) {
            return Err(RegistryError::NoDecoder {
                command: request.command.clone(),
            }
            .into());
        }

        Ok(EncodedFrame {
            header: FrameHeader {
                kind: request.kind,
                command: request.command.clone(),
                sequence: SequenceId::PLACEHOLDER,
            },
            encryption: request.encryption,
            oicq: request.oicq,
            expects_response: request.expects_response,
            flags: request.flags,
            body: request.encode_body()?,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ImbotError;
    use crate::protocol::commands::stat_svc::{self, RegisterResponse};

    fn create_test_register_body() -> Vec<u8> {
        bincode::serialize(&RegisterResponse {
            result: 0,
            message: "ok".into(),
            client_ip: 1,
            server_time: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_known_command_decodes() {
        let registry = PacketCodecRegistry::with_default_commands();
        let packet = registry.decode(
            commands::STAT_REGISTER,
            SequenceId(10),
            create_test_register_body(),
        );
        assert_eq!(packet.kind, PacketKind::Response);
        assert!(matches!(packet.payload, PacketPayload::Register(ref r) if r.is_success()));
    }

    #[test]
    fn test_unknown_command_keeps_raw_bytes() {
        let registry = PacketCodecRegistry::with_default_commands();
        let packet = registry.decode("Some.Unregistered", SequenceId(3), vec![1, 2, 3]);
        assert!(packet.is_unknown());
        assert_eq!(packet.kind, PacketKind::Unknown);
        assert_eq!(packet.body, vec![1, 2, 3]);

        // A later known frame still decodes
        let next = registry.decode(
            commands::STAT_REGISTER,
            SequenceId(4),
            create_test_register_body(),
        );
        assert!(!next.is_unknown());
    }

    #[test]
    fn test_command_match_is_exact() {
        let registry = PacketCodecRegistry::with_default_commands();
        assert!(registry
            .decode("statsvc.register", SequenceId(1), create_test_register_body())
            .is_unknown());
    }

    #[test]
    fn test_malformed_body_is_contained() {
        let registry = PacketCodecRegistry::with_default_commands();
        let packet = registry.decode(commands::STAT_REGISTER, SequenceId(1), vec![0xff]);
        assert!(matches!(packet.payload, PacketPayload::Malformed { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PacketCodecRegistry::new();
        registry
            .register("Custom.Cmd", Arc::new(LoginDecoder))
            .unwrap();
        let err = registry
            .register(
                "Custom.Cmd",
                response::<RegisterResponse>(PacketPayload::Register),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ImbotError::Registry(RegistryError::DuplicateDecoder { .. })
        ));
        // First registration still in place
        assert_eq!(registry.kind_of("Custom.Cmd"), PacketKind::Response);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_encode_leaves_sequence_placeholder() {
        let registry = PacketCodecRegistry::with_default_commands();
        let frame = registry.encode(&stat_svc::alive()).unwrap();
        assert_eq!(frame.header.sequence, SequenceId::PLACEHOLDER);
        assert_eq!(frame.header.command, commands::HEARTBEAT_ALIVE);
    }

    #[test]
    fn test_encode_requires_decoder_for_replies() {
        let registry = PacketCodecRegistry::new();
        assert!(registry.encode(&stat_svc::alive()).is_err());
    }
}
