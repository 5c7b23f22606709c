//! Domain events published to application listeners

use core::fmt;
use std::sync::Arc;

use crate::deferred::Deferred;
use crate::errors::SharedError;
use crate::message::{MessageChain, MessageSource, MessageTarget, SourceKind};
use crate::protocol::connection_state::CloseReason;
use crate::protocol::packet::Packet;
use crate::types::{GroupCode, Uin};

// ----------------------------------------------------------------------------
// Verification
// ----------------------------------------------------------------------------

/// Challenge the server raised during login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationChallenge {
    PictureCaptcha { image: Vec<u8> },
    SliderCaptcha { url: String },
    /// Login from an unrecognised device must be confirmed at `url`
    UnsafeDevice { url: String },
    Sms { phone: String },
}

impl VerificationChallenge {
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationChallenge::PictureCaptcha { .. } => "picture-captcha",
            VerificationChallenge::SliderCaptcha { .. } => "slider-captcha",
            VerificationChallenge::UnsafeDevice { .. } => "unsafe-device",
            VerificationChallenge::Sms { .. } => "sms",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationAnswer {
    /// Text of a picture captcha
    Captcha(String),
    /// Ticket returned by a slider captcha
    Ticket(String),
    SmsCode(String),
    /// The unsafe-device confirmation was completed
    Confirmed,
    Declined,
}

// ----------------------------------------------------------------------------
// Message Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendMessageEvent {
    pub sender: Uin,
    pub sender_nick: String,
    pub chain: MessageChain,
    pub source: MessageSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessageEvent {
    pub group: GroupCode,
    pub group_name: String,
    pub sender: Uin,
    pub sender_card: String,
    pub chain: MessageChain,
    pub source: MessageSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecallEvent {
    pub kind: SourceKind,
    /// Friend uin or group code
    pub target: u64,
    pub author: Uin,
    pub operator: Uin,
    pub sequence: u32,
    pub random: u32,
}

// ----------------------------------------------------------------------------
// Bot Event
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BotEvent {
    BotOnline {
        uin: Uin,
    },
    BotOffline {
        uin: Uin,
        reason: CloseReason,
        /// A replacement connection will be attempted
        reconnect: bool,
    },
    /// A fresh login replaced the previous session
    BotRelogin {
        uin: Uin,
        cause: Option<SharedError>,
    },
    /// Login is blocked until `responder` is completed
    VerificationRequired {
        uin: Uin,
        challenge: VerificationChallenge,
        responder: Deferred<VerificationAnswer>,
    },
    FriendMessage(FriendMessageEvent),
    GroupMessage(GroupMessageEvent),
    MessageRecalled(MessageRecallEvent),
    /// About to send `chain`; cancelling it stops the send
    MessagePreSend {
        target: MessageTarget,
        chain: MessageChain,
    },
    MemberJoined {
        group: GroupCode,
        member: Uin,
        nick: String,
    },
    MemberLeft {
        group: GroupCode,
        member: Uin,
        kicked_by: Option<Uin>,
    },
    GroupNameChanged {
        group: GroupCode,
        name: String,
        operator: Uin,
    },
    FriendListRefreshed {
        count: usize,
    },
    GroupListRefreshed {
        count: usize,
    },
    /// Raw observation of every decoded incoming packet
    PacketReceived {
        packet: Arc<Packet>,
    },
}

/// Discriminant of [`BotEvent`], used by listener filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BotOnline,
    BotOffline,
    BotRelogin,
    VerificationRequired,
    FriendMessage,
    GroupMessage,
    MessageRecalled,
    MessagePreSend,
    MemberJoined,
    MemberLeft,
    GroupNameChanged,
    FriendListRefreshed,
    GroupListRefreshed,
    PacketReceived,
}

impl BotEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BotEvent::BotOnline { .. } => EventKind::BotOnline,
            BotEvent::BotOffline { .. } => EventKind::BotOffline,
            BotEvent::BotRelogin { .. } => EventKind::BotRelogin,
            BotEvent::VerificationRequired { .. } => EventKind::VerificationRequired,
            BotEvent::FriendMessage(_) => EventKind::FriendMessage,
            BotEvent::GroupMessage(_) => EventKind::GroupMessage,
            BotEvent::MessageRecalled(_) => EventKind::MessageRecalled,
            BotEvent::MessagePreSend { .. } => EventKind::MessagePreSend,
            BotEvent::MemberJoined { .. } => EventKind::MemberJoined,
            BotEvent::MemberLeft { .. } => EventKind::MemberLeft,
            BotEvent::GroupNameChanged { .. } => EventKind::GroupNameChanged,
            BotEvent::FriendListRefreshed { .. } => EventKind::FriendListRefreshed,
            BotEvent::GroupListRefreshed { .. } => EventKind::GroupListRefreshed,
            BotEvent::PacketReceived { .. } => EventKind::PacketReceived,
        }
    }

    /// Message events a listener may mark cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            BotEvent::FriendMessage(_)
                | BotEvent::GroupMessage(_)
                | BotEvent::MessageRecalled(_)
                | BotEvent::MessagePreSend { .. }
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
