//! Server pushes
//!
//! Turns unsolicited packets into contact updates and bot events. Message
//! pushes go through the duplicate caches first; a push the server repeats
//! after a reconnect is only published once.

use std::sync::Arc;

use imbot_core::errors::{ImbotError, Result};
use imbot_core::events::{BotEvent, FriendMessageEvent, GroupMessageEvent, MessageRecallEvent};
use imbot_core::message::{DecodeContext, MessageSource, SourceKind};
use imbot_core::protocol::commands::friendlist::MemberPermission;
use imbot_core::protocol::commands::online_push::{
    self, GroupMessagePush, OnlinePushKind, OnlinePushRequest,
};
use imbot_core::protocol::commands::{config_push, message_svc, stat_svc};
use imbot_core::protocol::packet::PacketPayload;
use imbot_core::protocol::{CloseReason, Packet};
use tracing::{debug, info, warn};

use crate::contacts::Member;
use crate::handler::{NetworkHandler, SendOptions};

/// Handle one push routed out of the session processor
pub async fn handle_push(handler: &Arc<NetworkHandler>, packet: Packet) {
    let command = packet.command.clone();
    let result = match packet.payload {
        PacketPayload::PushNotify(_) => pull_friend_messages(handler).await,
        PacketPayload::GroupMessage(push) => {
            group_message(handler, push);
            Ok(())
        }
        PacketPayload::OnlinePush(request) => online_push(handler, request).await,
        PacketPayload::ForceOffline(push) => {
            warn!(uin = push.uin, title = %push.title, "Forced offline by server");
            handler
                .close(CloseReason::ForceOffline {
                    title: push.title,
                    message: push.tips,
                })
                .await;
            Ok(())
        }
        PacketPayload::MsfOffline(push) => {
            info!(uin = push.uin, info = %push.info, "Server asked for a reconnect");
            if let Err(e) = handler.send_only(stat_svc::msf_offline_ack(&push)).await {
                debug!(error = %e, "MSF offline ack not sent");
            }
            handler.close(CloseReason::MsfOffline).await;
            Ok(())
        }
        PacketPayload::ConfigPush(request) => {
            let servers = request.valid_servers();
            if !servers.is_empty() {
                handler.context().update_servers(servers.clone());
                handler.processor().update_servers(servers);
            }
            handler.send_only(config_push::ack(&request)).await
        }
        PacketPayload::Unknown => {
            debug!(command = %command, "Unhandled push");
            Ok(())
        }
        PacketPayload::Malformed { reason } => {
            Err(ImbotError::decode_failed(command.clone(), reason))
        }
        other => {
            debug!(command = %command, payload = other.name(), "Unexpected payload pushed");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(command = %command, error = %e, "Push handling failed");
    }
}

// ----------------------------------------------------------------------------
// Friend Messages
// ----------------------------------------------------------------------------

/// Pull pending friend messages after a `PushNotify`
pub async fn pull_friend_messages(handler: &NetworkHandler) -> Result<()> {
    let context = handler.context();
    let uin = context.uin();
    let options = SendOptions::new(context.config.timeouts.request);
    let payload = handler
        .send_and_expect(message_svc::get_message(context.sync_cookie()), options)
        .await?
        .into_payload()?;
    let PacketPayload::GetMessage(response) = payload else {
        return Err(ImbotError::invalid_packet(format!(
            "{} in reply to a message pull",
            payload.name()
        )));
    };
    context.set_sync_cookie(response.sync_cookie);

    for record in response.messages {
        if record.from_uin == uin {
            continue;
        }
        let key = (record.from_uin, record.sequence, record.random);
        if !context.caches.friend_messages.add_if_absent(key) {
            debug!(from = record.from_uin, sequence = record.sequence, "Duplicate friend message");
            continue;
        }

        let chain = context
            .messages
            .decode_bytes(&record.elems, &DecodeContext::friend(uin));
        let source = MessageSource {
            kind: SourceKind::Friend,
            from: record.from_uin,
            target: record.to_uin,
            sequence: record.sequence,
            random: record.random,
            time: record.time,
            preview: chain.content_to_string(),
        };
        let sender_nick = context
            .contacts
            .friend(record.from_uin)
            .map(|friend| friend.nick)
            .unwrap_or_default();
        context
            .events
            .broadcast(BotEvent::FriendMessage(FriendMessageEvent {
                sender: record.from_uin,
                sender_nick,
                chain,
                source,
            }));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Group Messages
// ----------------------------------------------------------------------------

fn group_message(handler: &NetworkHandler, push: GroupMessagePush) {
    let context = handler.context();
    let uin = context.uin();
    // Echo of a message this bot sent
    if push.from_uin == uin {
        return;
    }
    let key = (push.group_code, push.sequence, push.random);
    if !context.caches.group_messages.add_if_absent(key) {
        debug!(group = push.group_code, sequence = push.sequence, "Duplicate group message");
        return;
    }

    let chain = context
        .messages
        .decode_bytes(&push.elems, &DecodeContext::group(uin, push.group_code));
    let source = MessageSource {
        kind: SourceKind::Group,
        from: push.from_uin,
        target: push.group_code,
        sequence: push.sequence,
        random: push.random,
        time: push.time,
        preview: chain.content_to_string(),
    };
    let group_name = context
        .contacts
        .group(push.group_code)
        .map(|group| group.name)
        .unwrap_or(push.group_name);
    context
        .events
        .broadcast(BotEvent::GroupMessage(GroupMessageEvent {
            group: push.group_code,
            group_name,
            sender: push.from_uin,
            sender_card: push.sender_card,
            chain,
            source,
        }));
}

// ----------------------------------------------------------------------------
// Online Push
// ----------------------------------------------------------------------------

async fn online_push(handler: &NetworkHandler, request: OnlinePushRequest) -> Result<()> {
    // Every item is acknowledged, duplicates included
    if let Err(e) = handler.send_only(online_push::ack(&request)).await {
        warn!(error = %e, "Online push ack not sent");
    }

    let context = handler.context();
    for item in request.items {
        if !context.caches.online_push.add_if_absent(item.dedup_key()) {
            continue;
        }
        let event = match item.kind {
            OnlinePushKind::GroupRecall {
                group_code,
                operator,
                author,
                sequence,
                random,
            } => BotEvent::MessageRecalled(MessageRecallEvent {
                kind: SourceKind::Group,
                target: group_code,
                author,
                operator,
                sequence,
                random,
            }),
            OnlinePushKind::FriendRecall {
                from_uin,
                sequence,
                random,
                ..
            } => BotEvent::MessageRecalled(MessageRecallEvent {
                kind: SourceKind::Friend,
                target: from_uin,
                author: from_uin,
                operator: from_uin,
                sequence,
                random,
            }),
            OnlinePushKind::MemberJoined {
                group_code,
                member,
                nick,
            } => {
                context.contacts.add_member(Member {
                    group: group_code,
                    uin: member,
                    nick: nick.clone(),
                    card: String::new(),
                    permission: MemberPermission::Member,
                });
                BotEvent::MemberJoined {
                    group: group_code,
                    member,
                    nick,
                }
            }
            OnlinePushKind::MemberLeft {
                group_code,
                member,
                kicked_by,
            } => {
                context.contacts.remove_member(group_code, member);
                BotEvent::MemberLeft {
                    group: group_code,
                    member,
                    kicked_by,
                }
            }
            OnlinePushKind::GroupNameChanged {
                group_code,
                name,
                operator,
            } => {
                context.contacts.rename_group(group_code, &name);
                BotEvent::GroupNameChanged {
                    group: group_code,
                    name,
                    operator,
                }
            }
            OnlinePushKind::Other { kind, .. } => {
                debug!(kind, "Ignoring online push item");
                continue;
            }
        };
        context.events.broadcast(event);
    }
    Ok(())
}
