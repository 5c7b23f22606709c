//! Online status commands: registration, heartbeats and server-requested offline

use serde::{Deserialize, Serialize};

use crate::protocol::packet::OutgoingRequest;
use crate::types::Uin;

use super::{HEARTBEAT_ALIVE, STAT_MSF_OFFLINE_RESP, STAT_REGISTER, STAT_SIMPLE_GET};

/// Presence status values understood by `StatSvc.register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineStatus {
    Online,
    Away,
    Invisible,
    Offline,
}

impl OnlineStatus {
    pub fn code(self) -> u32 {
        match self {
            OnlineStatus::Online => 11,
            OnlineStatus::Away => 31,
            OnlineStatus::Invisible => 41,
            OnlineStatus::Offline => 21,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub uin: Uin,
    pub status: OnlineStatus,
    /// Kick other clients of the same kind
    pub kick_other: bool,
    pub guid: [u8; 16],
    pub os_version: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Zero on success
    pub result: i32,
    pub message: String,
    pub client_ip: u32,
    pub server_time: u32,
}

impl RegisterResponse {
    pub fn is_success(&self) -> bool {
        self.result == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimpleGetRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimpleGetResponse {
    pub server_time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AliveRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AliveResponse;

/// Server asks the client to drop the connection and reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsfOfflinePush {
    pub uin: Uin,
    pub sequence: u64,
    pub title: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsfOfflineAck {
    pub uin: Uin,
    pub sequence: u64,
}

// ----------------------------------------------------------------------------
// Request Builders
// ----------------------------------------------------------------------------

pub fn register(request: RegisterRequest) -> OutgoingRequest {
    OutgoingRequest::uni(STAT_REGISTER, request)
}

pub fn simple_get() -> OutgoingRequest {
    OutgoingRequest::uni(STAT_SIMPLE_GET, SimpleGetRequest)
}

pub fn alive() -> OutgoingRequest {
    OutgoingRequest::uni(HEARTBEAT_ALIVE, AliveRequest)
}

pub fn msf_offline_ack(push: &MsfOfflinePush) -> OutgoingRequest {
    OutgoingRequest::uni(
        STAT_MSF_OFFLINE_RESP,
        MsfOfflineAck {
            uin: push.uin,
            sequence: push.sequence,
        },
    )
    .without_response()
}
