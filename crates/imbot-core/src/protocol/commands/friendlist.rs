//! Contact list commands

use serde::{Deserialize, Serialize};

use crate::protocol::packet::OutgoingRequest;
use crate::types::{GroupCode, Uin};

use super::{FRIEND_LIST, GROUP_LIST, MEMBER_LIST};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendListRequest {
    pub uin: Uin,
    pub start_index: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub uin: Uin,
    pub nick: String,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendListResponse {
    pub total: u32,
    pub friends: Vec<FriendInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupListRequest {
    pub uin: Uin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub code: GroupCode,
    pub uin: u64,
    pub name: String,
    pub owner: Uin,
    pub member_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupListResponse {
    pub groups: Vec<GroupInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberListRequest {
    pub group_code: GroupCode,
    /// Zero for the first page
    pub next_uin: Uin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberPermission {
    Member,
    Administrator,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub uin: Uin,
    pub nick: String,
    pub card: String,
    pub permission: MemberPermission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberListResponse {
    pub group_code: GroupCode,
    pub members: Vec<MemberInfo>,
    /// Zero when this is the last page
    pub next_uin: Uin,
}

pub fn friend_list(uin: Uin, start_index: u32, count: u32) -> OutgoingRequest {
    OutgoingRequest::uni(
        FRIEND_LIST,
        FriendListRequest {
            uin,
            start_index,
            count,
        },
    )
}

pub fn group_list(uin: Uin) -> OutgoingRequest {
    OutgoingRequest::uni(GROUP_LIST, GroupListRequest { uin })
}

pub fn member_list(group_code: GroupCode, next_uin: Uin) -> OutgoingRequest {
    OutgoingRequest::uni(
        MEMBER_LIST,
        MemberListRequest {
            group_code,
            next_uin,
        },
    )
}
