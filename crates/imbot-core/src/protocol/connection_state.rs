//! Network handler state machine
//!
//! Consuming transitions over the handler lifecycle
//! `Initialized -> Connecting -> Loading -> Ok`, with `Closed` reachable from
//! every live state. The runtime keeps the current state in a watch channel and
//! applies transitions atomically; invalid transitions are rejected here.

use core::fmt;

use crate::errors::{ImbotError, SharedError};
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Close Reasons
// ----------------------------------------------------------------------------

/// Why a handler reached `Closed`
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// `close()` was called by the application
    UserRequested,
    /// Read or write on the transport failed
    Transport(SharedError),
    HeartbeatFailed(SharedError),
    /// Another client took over the account
    ForceOffline { title: String, message: String },
    /// Server asked the client to reconnect
    MsfOffline,
    /// Undecryptable traffic or expired session
    SessionInvalidated(SharedError),
    LoginFailed(SharedError),
    ConnectTimeout,
}

impl CloseReason {
    pub fn name(&self) -> &'static str {
        match self {
            CloseReason::UserRequested => "UserRequested",
            CloseReason::Transport(_) => "Transport",
            CloseReason::HeartbeatFailed(_) => "HeartbeatFailed",
            CloseReason::ForceOffline { .. } => "ForceOffline",
            CloseReason::MsfOffline => "MsfOffline",
            CloseReason::SessionInvalidated(_) => "SessionInvalidated",
            CloseReason::LoginFailed(_) => "LoginFailed",
            CloseReason::ConnectTimeout => "ConnectTimeout",
        }
    }

    /// Underlying error, if the closure was caused by one
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            CloseReason::Transport(e)
            | CloseReason::HeartbeatFailed(e)
            | CloseReason::SessionInvalidated(e)
            | CloseReason::LoginFailed(e) => Some(e),
            _ => None,
        }
    }

    /// Whether a replacement handler may be created for this closure.
    ///
    /// An invalidated session is recovered by a fresh handler that performs a
    /// full login, so it counts as recoverable.
    pub fn is_recoverable(&self, reconnect_on_force_offline: bool) -> bool {
        match self {
            CloseReason::UserRequested => false,
            CloseReason::Transport(_) => true,
            CloseReason::HeartbeatFailed(cause) => cause.is_recoverable(),
            CloseReason::ForceOffline { .. } => reconnect_on_force_offline,
            CloseReason::MsfOffline => true,
            CloseReason::SessionInvalidated(_) => true,
            CloseReason::LoginFailed(cause) => cause.is_recoverable(),
            CloseReason::ConnectTimeout => true,
        }
    }

    /// Error handed to operations cancelled by this closure
    pub fn to_error(&self) -> ImbotError {
        ImbotError::handler_closed(self.to_string())
    }

    /// Error reported to whoever was waiting for the handler to come up
    pub fn failure(&self) -> ImbotError {
        match self {
            CloseReason::ForceOffline { title, message } => ImbotError::ForceOffline {
                title: title.clone(),
                message: message.clone(),
            },
            other => match other.cause() {
                Some(cause) => ImbotError::Shared(std::sync::Arc::clone(cause)),
                None => other.to_error(),
            },
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ForceOffline { title, message } => {
                write!(f, "ForceOffline({title}: {message})")
            }
            other => match other.cause() {
                Some(cause) => write!(f, "{}({})", other.name(), cause),
                None => f.write_str(other.name()),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Handler State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum HandlerState {
    /// Created, no connection attempted yet
    Initialized,
    /// Transport connection in progress
    Connecting,
    /// Connected; login and post-login initialisation in progress
    Loading,
    /// Logged in and online
    Ok,
    /// Terminal
    Closed(CloseReason),
}

/// Events driving the handler lifecycle
#[derive(Debug, Clone)]
pub enum HandlerEvent {
    StartConnect,
    TransportConnected,
    LoginCompleted,
    Close(CloseReason),
}

impl HandlerEvent {
    fn name(&self) -> String {
        match self {
            HandlerEvent::StartConnect => "StartConnect".to_string(),
            HandlerEvent::TransportConnected => "TransportConnected".to_string(),
            HandlerEvent::LoginCompleted => "LoginCompleted".to_string(),
            HandlerEvent::Close(reason) => format!("Close({})", reason.name()),
        }
    }
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: HandlerState,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
}

impl HandlerState {
    /// State name for logging/audit
    pub fn state_name(&self) -> &'static str {
        match self {
            HandlerState::Initialized => "Initialized",
            HandlerState::Connecting => "Connecting",
            HandlerState::Loading => "Loading",
            HandlerState::Ok => "Ok",
            HandlerState::Closed(_) => "Closed",
        }
    }

    /// Process an event and transition to the new state (consumes self)
    pub fn transition(self, event: HandlerEvent) -> Result<StateTransition, StateTransitionError> {
        let from_state = self.state_name().to_string();
        let event_name = event.name();

        let new_state = match (self, event) {
            (HandlerState::Initialized, HandlerEvent::StartConnect) => HandlerState::Connecting,
            (HandlerState::Connecting, HandlerEvent::TransportConnected) => HandlerState::Loading,
            (HandlerState::Loading, HandlerEvent::LoginCompleted) => HandlerState::Ok,

            (HandlerState::Closed(existing), HandlerEvent::Close(_)) => {
                return Err(StateTransitionError::AlreadyClosed {
                    reason: existing.to_string(),
                });
            }
            (_, HandlerEvent::Close(reason)) => HandlerState::Closed(reason),

            (state, _) => {
                return Err(StateTransitionError::InvalidTransition {
                    reason: format!("{event_name} not valid in {}", state.state_name()),
                    from_state,
                    event: event_name,
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: Timestamp::now(),
            to_state: new_state.state_name().to_string(),
            from_state,
            event: event_name,
        };

        Ok(StateTransition {
            new_state,
            audit_entry,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HandlerState::Ok)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, HandlerState::Closed(_))
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        match self {
            HandlerState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Login traffic flows while loading; application traffic needs `Ok`
    pub fn accepts(&self, login_traffic: bool) -> bool {
        match self {
            HandlerState::Ok => true,
            HandlerState::Loading => login_traffic,
            _ => false,
        }
    }
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerState::Closed(reason) => write!(f, "Closed({reason})"),
            other => f.write_str(other.state_name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}: {reason}")]
    InvalidTransition {
        from_state: String,
        event: String,
        reason: String,
    },
    #[error("Handler already closed: {reason}")]
    AlreadyClosed { reason: String },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use std::sync::Arc;

    fn create_test_online_state() -> HandlerState {
        HandlerState::Initialized
            .transition(HandlerEvent::StartConnect)
            .unwrap()
            .new_state
            .transition(HandlerEvent::TransportConnected)
            .unwrap()
            .new_state
            .transition(HandlerEvent::LoginCompleted)
            .unwrap()
            .new_state
    }

    #[test]
    fn test_happy_path() {
        let state = create_test_online_state();
        assert!(state.is_ok());
        assert!(state.accepts(false));
    }

    #[test]
    fn test_loading_accepts_only_login_traffic() {
        let state = HandlerState::Initialized
            .transition(HandlerEvent::StartConnect)
            .unwrap()
            .new_state
            .transition(HandlerEvent::TransportConnected)
            .unwrap();
        assert_eq!(state.audit_entry.from_state, "Connecting");
        assert_eq!(state.audit_entry.to_state, "Loading");
        assert!(state.new_state.accepts(true));
        assert!(!state.new_state.accepts(false));
    }

    #[test]
    fn test_invalid_transition() {
        let result = HandlerState::Initialized.transition(HandlerEvent::LoginCompleted);
        match result.unwrap_err() {
            StateTransitionError::InvalidTransition { from_state, .. } => {
                assert_eq!(from_state, "Initialized");
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_close_from_any_live_state() {
        for state in [
            HandlerState::Initialized,
            HandlerState::Connecting,
            HandlerState::Loading,
            HandlerState::Ok,
        ] {
            let transition = state
                .transition(HandlerEvent::Close(CloseReason::ConnectTimeout))
                .unwrap();
            assert!(transition.new_state.is_closed());
        }
    }

    #[test]
    fn test_close_is_terminal() {
        let closed = create_test_online_state()
            .transition(HandlerEvent::Close(CloseReason::UserRequested))
            .unwrap()
            .new_state;
        assert!(matches!(
            closed.clone().transition(HandlerEvent::Close(CloseReason::MsfOffline)),
            Err(StateTransitionError::AlreadyClosed { .. })
        ));
        assert!(closed.transition(HandlerEvent::StartConnect).is_err());
    }

    #[test]
    fn test_close_reason_recoverability() {
        assert!(!CloseReason::UserRequested.is_recoverable(true));
        assert!(CloseReason::MsfOffline.is_recoverable(false));

        let force = CloseReason::ForceOffline {
            title: "offline".into(),
            message: "logged in elsewhere".into(),
        };
        assert!(!force.is_recoverable(false));
        assert!(force.is_recoverable(true));

        let invalidated =
            CloseReason::SessionInvalidated(Arc::new(ImbotError::Session(SessionError::Expired)));
        assert!(invalidated.is_recoverable(false));
        assert!(invalidated.to_string().contains("expired"));
    }
}
