//! Scripted server behaviour
//!
//! A [`Scenario`] fixes the account the server accepts, the verification
//! steps a password login must pass and the contact lists it serves.

use std::collections::VecDeque;

use hashbrown::HashMap;
use imbot_core::protocol::commands::friendlist::{
    FriendInfo, GroupInfo, MemberInfo, MemberPermission,
};
use imbot_core::types::{GroupCode, Uin};

pub const TEST_UIN: Uin = 10_001;
pub const TEST_PASSWORD_MD5: [u8; 16] = [0x5a; 16];

/// One verification step the server demands before accepting a password
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginChallenge {
    PictureCaptcha { answer: String },
    SliderCaptcha { ticket: String },
    UnsafeDevice { ticket: String },
    Sms { phone: String, code: String },
    DeviceLock,
    /// Refuse the attempt with the retry-later code once
    RetryLater,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub uin: Uin,
    pub password_md5: [u8; 16],
    pub nick: String,
    /// Consumed front to back across all password logins
    pub challenges: VecDeque<LoginChallenge>,
    pub friends: Vec<FriendInfo>,
    pub groups: Vec<GroupInfo>,
    pub members: HashMap<GroupCode, Vec<MemberInfo>>,
    pub reject_register: bool,
    /// Refuse fast logins so the client falls back to its password
    pub reject_fast_login: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            uin: TEST_UIN,
            password_md5: TEST_PASSWORD_MD5,
            nick: "imbot".into(),
            challenges: VecDeque::new(),
            friends: Vec::new(),
            groups: Vec::new(),
            members: HashMap::new(),
            reject_register: false,
            reject_fast_login: false,
        }
    }
}

impl Scenario {
    pub fn new(uin: Uin, password_md5: [u8; 16]) -> Self {
        Self {
            uin,
            password_md5,
            ..Self::default()
        }
    }

    pub fn with_challenge(mut self, challenge: LoginChallenge) -> Self {
        self.challenges.push_back(challenge);
        self
    }

    pub fn with_friend(mut self, uin: Uin, nick: &str) -> Self {
        self.friends.push(FriendInfo {
            uin,
            nick: nick.into(),
            remark: String::new(),
        });
        self
    }

    /// Add `count` numbered friends starting at `first`
    pub fn with_friends(mut self, first: Uin, count: u64) -> Self {
        for uin in first..first + count {
            self = self.with_friend(uin, &format!("friend-{uin}"));
        }
        self
    }

    pub fn with_group(mut self, code: GroupCode, name: &str, owner: Uin) -> Self {
        self.groups.push(GroupInfo {
            code,
            uin: code + 202_000_000,
            name: name.into(),
            owner,
            member_count: 0,
        });
        self
    }

    pub fn with_member(mut self, group: GroupCode, uin: Uin, card: &str) -> Self {
        let members = self.members.entry(group).or_default();
        let permission = match self.groups.iter().find(|g| g.code == group) {
            Some(info) if info.owner == uin => MemberPermission::Owner,
            _ => MemberPermission::Member,
        };
        members.push(MemberInfo {
            uin,
            nick: format!("member-{uin}"),
            card: card.into(),
            permission,
        });
        if let Some(info) = self.groups.iter_mut().find(|g| g.code == group) {
            info.member_count = members.len() as u32;
        }
        self
    }

    pub fn rejecting_register(mut self) -> Self {
        self.reject_register = true;
        self
    }

    pub fn rejecting_fast_login(mut self) -> Self {
        self.reject_fast_login = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_counts_follow_members() {
        let scenario = Scenario::default()
            .with_group(100, "rustaceans", 7)
            .with_member(100, 7, "owner")
            .with_member(100, 8, "");

        assert_eq!(scenario.groups[0].member_count, 2);
        let members = &scenario.members[&100];
        assert_eq!(members[0].permission, MemberPermission::Owner);
        assert_eq!(members[1].permission, MemberPermission::Member);
    }

    #[test]
    fn test_numbered_friends() {
        let scenario = Scenario::default().with_friends(20_000, 3);
        let uins: Vec<Uin> = scenario.friends.iter().map(|f| f.uin).collect();
        assert_eq!(uins, vec![20_000, 20_001, 20_002]);
    }
}
