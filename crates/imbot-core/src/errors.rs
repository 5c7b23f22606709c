//! Error types for the imbot protocol engine
//!
//! This module contains every error type used by the codec, session, login and
//! connection layers, plus the `ImbotError` type that unifies them all. The
//! recoverability classification used by the reconnection logic lives here as well.

use std::sync::Arc;

use crate::config::HeartbeatKind;
use crate::protocol::connection_state::StateTransitionError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("Connection closed by remote")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Outbound queue closed")]
    OutboundClosed,
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Specific packet validation error types
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("Packet payload too small (expected at least {expected}, got {actual})")]
    PayloadTooSmall { expected: usize, actual: usize },
    #[error("Malformed frame header")]
    MalformedHeader,
    #[error("Unknown frame kind: {0:#x}")]
    UnknownFrameKind(u32),
    #[error("Unsupported encryption flag: {0}")]
    UnsupportedEncryption(u8),
    #[error("Unsupported compression flag: {0}")]
    UnsupportedCompression(u32),
    #[error("Decompressed body exceeds {max} bytes")]
    DecompressedTooLarge { max: usize },
    #[error("Server returned code {code} for {command}")]
    ReturnCode { code: i32, command: String },
    #[error("Failed to decode {command}: {reason}")]
    DecodeFailed { command: String, reason: String },
    #[error("{message}")]
    Generic { message: String },
}

impl From<String> for PacketError {
    fn from(message: String) -> Self {
        PacketError::Generic { message }
    }
}

impl From<&str> for PacketError {
    fn from(message: &str) -> Self {
        PacketError::Generic {
            message: message.to_string(),
        }
    }
}

/// Specific session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Frame decryption failed (within key rotation window: {within_grace})")]
    DecryptFailed { within_grace: bool },
    #[error("Session expired on server")]
    Expired,
    #[error("Session invalidated")]
    Invalidated,
    #[error("Session key missing: {what}")]
    MissingKey { what: &'static str },
    #[error("Invalid auth state transition from {from} on {event}")]
    InvalidAuthState { from: String, event: String },
}

/// Specific login error types
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("Wrong password: {message}")]
    WrongPassword { message: String },
    #[error("Login rejected, retry later: {message}")]
    RetryLater { message: String },
    #[error("Verification `{kind}` was not answered")]
    VerificationDeclined { kind: String },
    #[error("Verification `{kind}` is not supported")]
    VerificationUnsupported { kind: String },
    #[error("Unexpected login response: {reason}")]
    UnexpectedResponse { reason: String },
    #[error("Too many verification rounds ({rounds})")]
    TooManyRounds { rounds: u32 },
    #[error("No saved session for {uin} and no password configured")]
    NoSavedSession { uin: u64 },
}

/// Message element composition and decoding errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("{unit} could not decode element {tag}: {reason}")]
    MalformedElement {
        unit: &'static str,
        tag: u16,
        reason: String,
    },
    #[error("No message unit accepts {kind}")]
    Unclaimed { kind: String },
    #[error("Invalid {kind} content: {reason}")]
    InvalidContent { kind: String, reason: String },
    #[error("Sending to {target} was cancelled by a listener")]
    SendCancelled { target: u64 },
}

/// Codec registry error types
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("A decoder for {command} is already registered")]
    DuplicateDecoder { command: String },
    #[error("No decoder registered for {command}")]
    NoDecoder { command: String },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the imbot engine
#[derive(Debug, thiserror::Error)]
pub enum ImbotError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Login error: {0}")]
    Login(#[from] LoginError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("{kind} heartbeat failed: {source}")]
    HeartbeatFailed {
        kind: HeartbeatKind,
        #[source]
        source: Box<ImbotError>,
    },

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Network handler closed: {reason}")]
    HandlerClosed { reason: String },

    #[error("Network handler not ready (state {state})")]
    NotReady { state: String },

    #[error("Selector closed")]
    SelectorClosed,

    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Forced offline: {title}: {message}")]
    ForceOffline { title: String, message: String },

    #[error("{command} rejected by server ({code}): {message}")]
    Rejected {
        command: String,
        code: i32,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// An error already shared between tasks, surfaced again
    #[error(transparent)]
    Shared(SharedError),
}

/// Errors shared between tasks (close reasons, deferred results)
pub type SharedError = Arc<ImbotError>;

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

impl ImbotError {
    /// Whether a fresh attempt (new connection or re-sent request) may succeed.
    ///
    /// Transport and packet level failures are recoverable. Session failures are
    /// recoverable only inside a key rotation window. Authentication failures are
    /// never recoverable except for a server side "retry later".
    pub fn is_recoverable(&self) -> bool {
        match self {
            ImbotError::Serialization(_) => true,
            ImbotError::Transport(_) => true,
            ImbotError::InvalidPacket(_) => true,
            ImbotError::Session(SessionError::DecryptFailed { within_grace }) => *within_grace,
            ImbotError::Session(_) => false,
            ImbotError::Login(LoginError::RetryLater { .. }) => true,
            ImbotError::Login(_) => false,
            ImbotError::Registry(_) => false,
            ImbotError::Message(MessageError::MalformedElement { .. }) => true,
            ImbotError::Message(_) => false,
            ImbotError::StateTransition(_) => false,
            ImbotError::HeartbeatFailed { source, .. } => match source.as_ref() {
                ImbotError::Timeout { .. } | ImbotError::Transport(_) => true,
                ImbotError::HandlerClosed { .. } | ImbotError::Session(_) => false,
                other => other.is_recoverable(),
            },
            ImbotError::Timeout { .. } => true,
            ImbotError::HandlerClosed { .. } => true,
            ImbotError::NotReady { .. } => true,
            ImbotError::SelectorClosed => false,
            ImbotError::ReconnectExhausted { .. } => false,
            ImbotError::ForceOffline { .. } => false,
            ImbotError::Rejected { .. } => false,
            ImbotError::Configuration { .. } => false,
            ImbotError::Shared(inner) => inner.is_recoverable(),
        }
    }

    /// Whether this error means the server-side session is gone
    pub fn invalidates_session(&self) -> bool {
        match self {
            ImbotError::Shared(inner) => inner.invalidates_session(),
            other => matches!(
                other,
                ImbotError::Session(SessionError::Expired)
                    | ImbotError::Session(SessionError::Invalidated)
                    | ImbotError::Session(SessionError::DecryptFailed {
                        within_grace: false
                    })
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ImbotError {
    /// Create an invalid packet error with a message
    pub fn invalid_packet<T: Into<String>>(message: T) -> Self {
        ImbotError::InvalidPacket(PacketError::Generic {
            message: message.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ImbotError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout<T: Into<String>>(operation: T, duration: std::time::Duration) -> Self {
        ImbotError::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a handler closed error with a reason
    pub fn handler_closed<T: Into<String>>(reason: T) -> Self {
        ImbotError::HandlerClosed {
            reason: reason.into(),
        }
    }

    /// Create a transport connection failed error
    pub fn connection_failed<A: Into<String>, R: Into<String>>(address: A, reason: R) -> Self {
        ImbotError::Transport(TransportError::ConnectionFailed {
            address: address.into(),
            reason: reason.into(),
        })
    }

    /// Create a decode failure for a command
    pub fn decode_failed<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        ImbotError::InvalidPacket(PacketError::DecodeFailed {
            command: command.into(),
            reason: reason.into(),
        })
    }

    /// Wrap a heartbeat failure with the heartbeat kind that produced it
    pub fn heartbeat_failed(kind: HeartbeatKind, source: ImbotError) -> Self {
        ImbotError::HeartbeatFailed {
            kind,
            source: Box::new(source),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ImbotError>;
pub type ImbotResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transport_and_packet_errors_are_recoverable() {
        assert!(ImbotError::connection_failed("127.0.0.1:8080", "refused").is_recoverable());
        assert!(ImbotError::invalid_packet("short frame").is_recoverable());
        assert!(ImbotError::timeout("send", Duration::from_millis(5)).is_recoverable());
    }

    #[test]
    fn test_auth_errors_are_not_recoverable() {
        let wrong = ImbotError::Login(LoginError::WrongPassword {
            message: "bad".into(),
        });
        assert!(!wrong.is_recoverable());

        let later = ImbotError::Login(LoginError::RetryLater {
            message: "busy".into(),
        });
        assert!(later.is_recoverable());
    }

    #[test]
    fn test_session_errors_recoverable_only_in_grace_window() {
        let inside = ImbotError::Session(SessionError::DecryptFailed { within_grace: true });
        let outside = ImbotError::Session(SessionError::DecryptFailed {
            within_grace: false,
        });
        assert!(inside.is_recoverable());
        assert!(!inside.invalidates_session());
        assert!(!outside.is_recoverable());
        assert!(outside.invalidates_session());
    }

    #[test]
    fn test_heartbeat_failure_follows_cause() {
        let timed_out = ImbotError::heartbeat_failed(
            HeartbeatKind::Alive,
            ImbotError::timeout("Heartbeat.Alive", Duration::from_secs(5)),
        );
        assert!(timed_out.is_recoverable());
        assert!(timed_out.to_string().contains("Alive"));

        let closed = ImbotError::heartbeat_failed(
            HeartbeatKind::Stat,
            ImbotError::handler_closed("UserRequested"),
        );
        assert!(!closed.is_recoverable());

        let rejected = ImbotError::heartbeat_failed(
            HeartbeatKind::Register,
            ImbotError::Rejected {
                command: "StatSvc.register".into(),
                code: 1,
                message: "denied".into(),
            },
        );
        assert!(!rejected.is_recoverable());
    }

    #[test]
    fn test_shared_error_keeps_classification() {
        let shared: SharedError = Arc::new(ImbotError::Login(LoginError::WrongPassword {
            message: "bad".into(),
        }));
        let surfaced = ImbotError::Shared(Arc::clone(&shared));
        assert!(!surfaced.is_recoverable());
        assert_eq!(surfaced.to_string(), shared.to_string());
    }
}
