//! Message send, pull and recall commands

use serde::{Deserialize, Serialize};

use crate::protocol::packet::{OutgoingRequest, PacketFlags};
use crate::types::{GroupCode, Uin};

use super::{PB_GET_MSG, PB_MSG_WITHDRAW, PB_SEND_MSG};

/// Destination of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingHead {
    Friend { uin: Uin },
    Group { code: GroupCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub routing: RoutingHead,
    /// Client chosen id, echoed in receipts and needed for recall
    pub random: u32,
    pub time: u32,
    /// Element list in tag/length framing
    pub elems: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Zero on success
    pub result: i32,
    pub message: String,
    /// Server assigned message sequence
    pub sequence: u32,
    pub send_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GetMessageRequest {
    pub sync_cookie: Vec<u8>,
}

/// One stored friend message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub from_uin: Uin,
    pub to_uin: Uin,
    pub sequence: u32,
    pub random: u32,
    pub time: u32,
    pub elems: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GetMessageResponse {
    pub sync_cookie: Vec<u8>,
    pub messages: Vec<MessageRecord>,
}

/// New friend messages are waiting to be pulled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotify {
    pub uin: Uin,
    pub message_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecallRequest {
    Friend {
        uin: Uin,
        sequence: u32,
        random: u32,
        time: u32,
    },
    Group {
        code: GroupCode,
        sequence: u32,
        random: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallResponse {
    pub result: i32,
    pub message: String,
}

/// Another client took over this account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceOfflinePush {
    pub uin: Uin,
    pub title: String,
    pub tips: String,
}

pub fn send_message(request: SendMessageRequest) -> OutgoingRequest {
    OutgoingRequest::uni(PB_SEND_MSG, request)
}

pub fn get_message(sync_cookie: Vec<u8>) -> OutgoingRequest {
    OutgoingRequest::uni(PB_GET_MSG, GetMessageRequest { sync_cookie })
        .with_flags(PacketFlags::NO_LOG)
}

pub fn recall(request: RecallRequest) -> OutgoingRequest {
    OutgoingRequest::uni(PB_MSG_WITHDRAW, request)
}
