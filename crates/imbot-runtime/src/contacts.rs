//! Contact registry
//!
//! Friends, groups and members keyed by id. A member refers to its group by
//! group code only; lookups go through the registry.

use dashmap::DashMap;
use imbot_core::protocol::commands::friendlist::{
    FriendInfo, GroupInfo, MemberInfo, MemberPermission,
};
use imbot_core::types::{GroupCode, Uin};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Contact Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub uin: Uin,
    pub nick: String,
    pub remark: String,
}

impl Friend {
    /// Remark if set, nick otherwise
    pub fn display_name(&self) -> &str {
        if self.remark.is_empty() {
            &self.nick
        } else {
            &self.remark
        }
    }
}

impl From<FriendInfo> for Friend {
    fn from(info: FriendInfo) -> Self {
        Self {
            uin: info.uin,
            nick: info.nick,
            remark: info.remark,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub code: GroupCode,
    pub uin: u64,
    pub name: String,
    pub owner: Uin,
    pub member_count: u32,
}

impl From<GroupInfo> for Group {
    fn from(info: GroupInfo) -> Self {
        Self {
            code: info.code,
            uin: info.uin,
            name: info.name,
            owner: info.owner,
            member_count: info.member_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub group: GroupCode,
    pub uin: Uin,
    pub nick: String,
    pub card: String,
    pub permission: MemberPermission,
}

impl Member {
    pub fn from_info(group: GroupCode, info: MemberInfo) -> Self {
        Self {
            group,
            uin: info.uin,
            nick: info.nick,
            card: info.card,
            permission: info.permission,
        }
    }

    /// Group card if set, nick otherwise
    pub fn display_name(&self) -> &str {
        if self.card.is_empty() {
            &self.nick
        } else {
            &self.card
        }
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ContactRegistry {
    friends: DashMap<Uin, Friend>,
    groups: DashMap<GroupCode, Group>,
    members: DashMap<(GroupCode, Uin), Member>,
}

impl ContactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Friends
    // ------------------------------------------------------------------

    /// Replace the friend list with a freshly loaded one
    pub fn replace_friends(&self, friends: impl IntoIterator<Item = Friend>) {
        self.friends.clear();
        for friend in friends {
            self.friends.insert(friend.uin, friend);
        }
    }

    pub fn friend(&self, uin: Uin) -> Option<Friend> {
        self.friends.get(&uin).map(|f| f.clone())
    }

    pub fn friends(&self) -> Vec<Friend> {
        let mut friends: Vec<Friend> = self.friends.iter().map(|f| f.clone()).collect();
        friends.sort_by_key(|f| f.uin);
        friends
    }

    pub fn friend_count(&self) -> usize {
        self.friends.len()
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Replace the group list; members of groups no longer listed are dropped
    pub fn replace_groups(&self, groups: impl IntoIterator<Item = Group>) {
        self.groups.clear();
        for group in groups {
            self.groups.insert(group.code, group);
        }
        self.members
            .retain(|(group, _), _| self.groups.contains_key(group));
    }

    pub fn group(&self, code: GroupCode) -> Option<Group> {
        self.groups.get(&code).map(|g| g.clone())
    }

    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = self.groups.iter().map(|g| g.clone()).collect();
        groups.sort_by_key(|g| g.code);
        groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns false if the group is unknown
    pub fn rename_group(&self, code: GroupCode, name: &str) -> bool {
        match self.groups.get_mut(&code) {
            Some(mut group) => {
                group.name = name.to_string();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    pub fn replace_members(&self, group: GroupCode, members: impl IntoIterator<Item = Member>) {
        self.members.retain(|(code, _), _| *code != group);
        let mut count = 0u32;
        for member in members {
            self.members.insert((group, member.uin), member);
            count += 1;
        }
        if let Some(mut entry) = self.groups.get_mut(&group) {
            entry.member_count = count;
        }
    }

    pub fn member(&self, group: GroupCode, uin: Uin) -> Option<Member> {
        self.members.get(&(group, uin)).map(|m| m.clone())
    }

    pub fn members(&self, group: GroupCode) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .members
            .iter()
            .filter(|entry| entry.key().0 == group)
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by_key(|m| m.uin);
        members
    }

    pub fn add_member(&self, member: Member) {
        if let Some(mut group) = self.groups.get_mut(&member.group) {
            if !self.members.contains_key(&(member.group, member.uin)) {
                group.member_count += 1;
            }
        }
        self.members.insert((member.group, member.uin), member);
    }

    pub fn remove_member(&self, group: GroupCode, uin: Uin) -> Option<Member> {
        let removed = self.members.remove(&(group, uin)).map(|(_, m)| m);
        if removed.is_some() {
            if let Some(mut entry) = self.groups.get_mut(&group) {
                entry.member_count = entry.member_count.saturating_sub(1);
            }
        }
        removed
    }

    pub fn clear(&self) {
        self.friends.clear();
        self.groups.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_group(code: GroupCode) -> Group {
        Group {
            code,
            uin: code + 1_000_000,
            name: format!("group-{code}"),
            owner: 1,
            member_count: 0,
        }
    }

    fn create_test_member(group: GroupCode, uin: Uin) -> Member {
        Member {
            group,
            uin,
            nick: format!("member-{uin}"),
            card: String::new(),
            permission: MemberPermission::Member,
        }
    }

    #[test]
    fn test_members_follow_group_lifetime() {
        let registry = ContactRegistry::new();
        registry.replace_groups(vec![create_test_group(1), create_test_group(2)]);
        registry.replace_members(1, vec![create_test_member(1, 10), create_test_member(1, 11)]);
        registry.replace_members(2, vec![create_test_member(2, 20)]);
        assert_eq!(registry.group(1).unwrap().member_count, 2);

        registry.replace_groups(vec![create_test_group(2)]);
        assert!(registry.members(1).is_empty());
        assert_eq!(registry.members(2).len(), 1);
    }

    #[test]
    fn test_member_join_and_leave_adjust_count() {
        let registry = ContactRegistry::new();
        registry.replace_groups(vec![create_test_group(5)]);
        registry.add_member(create_test_member(5, 50));
        registry.add_member(create_test_member(5, 50));
        assert_eq!(registry.group(5).unwrap().member_count, 1);

        assert!(registry.remove_member(5, 50).is_some());
        assert!(registry.remove_member(5, 50).is_none());
        assert_eq!(registry.group(5).unwrap().member_count, 0);
    }

    #[test]
    fn test_display_names() {
        let friend = Friend {
            uin: 1,
            nick: "nick".into(),
            remark: String::new(),
        };
        assert_eq!(friend.display_name(), "nick");
        let mut member = create_test_member(1, 2);
        member.card = "card".into();
        assert_eq!(member.display_name(), "card");
        assert!(!ContactRegistry::new().rename_group(9, "x"));
    }
}
