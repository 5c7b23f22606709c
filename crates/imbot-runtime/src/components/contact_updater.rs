//! Friend, group and member list loading

use imbot_core::errors::{ImbotError, Result};
use imbot_core::events::BotEvent;
use imbot_core::protocol::commands::friendlist;
use imbot_core::protocol::packet::PacketPayload;
use imbot_core::protocol::OutgoingRequest;
use imbot_core::types::GroupCode;
use tracing::{debug, info};

use crate::contacts::{Friend, Group, Member};
use crate::handler::{NetworkHandler, SendOptions};

/// Friends requested per page
const FRIEND_PAGE_SIZE: u32 = 150;

/// Guards against a server that never reports the last page
const MAX_PAGES: usize = 1000;

async fn fetch(handler: &NetworkHandler, request: OutgoingRequest) -> Result<PacketPayload> {
    let options = SendOptions::new(handler.context().config.timeouts.request).with_attempts(2);
    handler
        .send_for_session(request, options)
        .await?
        .into_payload()
}

fn unexpected(payload: &PacketPayload, what: &str) -> ImbotError {
    ImbotError::invalid_packet(format!("{} in reply to a {what} request", payload.name()))
}

/// Reload the friend list; returns the number of friends
pub async fn refresh_friends(handler: &NetworkHandler) -> Result<usize> {
    let uin = handler.uin();
    let mut friends = Vec::new();
    let mut start = 0u32;

    for _ in 0..MAX_PAGES {
        let payload = fetch(handler, friendlist::friend_list(uin, start, FRIEND_PAGE_SIZE)).await?;
        let PacketPayload::FriendList(page) = payload else {
            return Err(unexpected(&payload, "friend list"));
        };
        let received = page.friends.len() as u32;
        friends.extend(page.friends.into_iter().map(Friend::from));
        start += received;
        debug!(uin, loaded = start, total = page.total, "Friend list page");
        if received == 0 || start >= page.total {
            break;
        }
    }

    let count = friends.len();
    let context = handler.context();
    context.contacts.replace_friends(friends);
    info!(uin, count, "Friend list loaded");
    context.events.broadcast(BotEvent::FriendListRefreshed { count });
    Ok(count)
}

/// Reload the group list; returns the number of groups
pub async fn refresh_groups(handler: &NetworkHandler) -> Result<usize> {
    let uin = handler.uin();
    let payload = fetch(handler, friendlist::group_list(uin)).await?;
    let PacketPayload::GroupList(response) = payload else {
        return Err(unexpected(&payload, "group list"));
    };

    let count = response.groups.len();
    let context = handler.context();
    context
        .contacts
        .replace_groups(response.groups.into_iter().map(Group::from));
    info!(uin, count, "Group list loaded");
    context.events.broadcast(BotEvent::GroupListRefreshed { count });
    Ok(count)
}

/// Reload the members of one group; returns the number of members
pub async fn refresh_members(handler: &NetworkHandler, group: GroupCode) -> Result<usize> {
    let mut members = Vec::new();
    let mut next_uin = 0;

    for _ in 0..MAX_PAGES {
        let payload = fetch(handler, friendlist::member_list(group, next_uin)).await?;
        let PacketPayload::MemberList(page) = payload else {
            return Err(unexpected(&payload, "member list"));
        };
        members.extend(
            page.members
                .into_iter()
                .map(|info| Member::from_info(group, info)),
        );
        next_uin = page.next_uin;
        if next_uin == 0 {
            break;
        }
    }

    let count = members.len();
    handler.context().contacts.replace_members(group, members);
    debug!(group, count, "Member list loaded");
    Ok(count)
}
