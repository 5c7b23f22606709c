//! Online pushes: group messages and group/friend notifications

use serde::{Deserialize, Serialize};

use crate::protocol::packet::OutgoingRequest;
use crate::types::{GroupCode, Uin};

use super::ONLINE_PUSH_RESP;

/// Group message delivered by `OnlinePush.PbPushGroupMsg`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessagePush {
    pub group_code: GroupCode,
    pub group_name: String,
    pub from_uin: Uin,
    pub sender_card: String,
    pub sequence: u32,
    pub random: u32,
    pub time: u32,
    pub elems: Vec<u8>,
}

/// Notification carried in `OnlinePush.ReqPush`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlinePushKind {
    GroupRecall {
        group_code: GroupCode,
        operator: Uin,
        author: Uin,
        sequence: u32,
        random: u32,
    },
    FriendRecall {
        from_uin: Uin,
        sequence: u32,
        random: u32,
        time: u32,
    },
    MemberJoined {
        group_code: GroupCode,
        member: Uin,
        nick: String,
    },
    MemberLeft {
        group_code: GroupCode,
        member: Uin,
        kicked_by: Option<Uin>,
    },
    GroupNameChanged {
        group_code: GroupCode,
        name: String,
        operator: Uin,
    },
    Other {
        kind: u32,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePushItem {
    pub from_uin: Uin,
    pub message_sequence: u32,
    pub message_uid: u64,
    pub time: u32,
    pub kind: OnlinePushKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePushRequest {
    pub uin: Uin,
    pub sequence: u32,
    pub items: Vec<OnlinePushItem>,
}

/// Acknowledges every item of a `ReqPush`, including duplicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlinePushAck {
    pub uin: Uin,
    pub sequence: u32,
    pub items: Vec<(Uin, u32, u64)>,
}

impl OnlinePushItem {
    /// Identity used for duplicate suppression
    pub fn dedup_key(&self) -> (Uin, u32, u64) {
        (self.from_uin, self.message_sequence, self.message_uid)
    }
}

pub fn ack(request: &OnlinePushRequest) -> OutgoingRequest {
    OutgoingRequest::uni(
        ONLINE_PUSH_RESP,
        OnlinePushAck {
            uin: request.uin,
            sequence: request.sequence,
            items: request.items.iter().map(OnlinePushItem::dedup_key).collect(),
        },
    )
    .without_response()
}
