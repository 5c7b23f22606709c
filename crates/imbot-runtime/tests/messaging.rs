//! Sending, recalling and receiving messages against the in-process server

use std::time::Duration;

use imbot_core::config::ServerAddress;
use imbot_core::protocol::commands::config_push::ServerEntry;
use imbot_core::protocol::commands::message_svc::RoutingHead;
use imbot_core::protocol::commands::online_push::{OnlinePushItem, OnlinePushKind};
use imbot_core::protocol::commands::{self, stat_svc};
use imbot_core::{MessageError, PacketPayload, SingleMessage};
use imbot_harness::{MockServer, Scenario, TEST_PASSWORD_MD5, TEST_UIN};
use imbot_runtime::{
    Account, Bot, BotEvent, Credentials, EventFilter, EventKind, EventPriority, ImbotError,
    ListeningStatus, MessageChain, MessageTarget,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const FRIEND: u64 = 20_000;
const GROUP: u64 = 100;
const MEMBER: u64 = 30_001;

fn create_test_scenario() -> Scenario {
    Scenario::default()
        .with_friend(FRIEND, "alice")
        .with_group(GROUP, "rustaceans", TEST_UIN)
        .with_member(GROUP, TEST_UIN, "bot")
        .with_member(GROUP, MEMBER, "ferris")
}

async fn create_online_bot(server: &MockServer) -> Bot {
    let bot = Bot::builder(Account::new(
        TEST_UIN,
        Credentials::PasswordMd5(TEST_PASSWORD_MD5),
    ))
    .with_config(server.config())
    .with_connector(server.connector())
    .build()
    .expect("valid test configuration");
    bot.login().await.expect("login succeeds");
    bot
}

async fn next_event(events: &mut UnboundedReceiver<BotEvent>) -> BotEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event in time")
        .expect("dispatcher alive")
}

fn create_test_push_item(sequence: u32, kind: OnlinePushKind) -> OnlinePushItem {
    OnlinePushItem {
        from_uin: GROUP,
        message_sequence: sequence,
        message_uid: u64::from(sequence) << 32,
        time: 1_700_000_000,
        kind,
    }
}

// ----------------------------------------------------------------------------
// Outbound
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_and_recall_friend_message() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let chain = MessageChain::new(vec![
        SingleMessage::text("hello "),
        SingleMessage::text("alice"),
    ]);

    let receipt = bot
        .send_message(MessageTarget::Friend(FRIEND), &chain)
        .await
        .unwrap();

    let sent = server.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].request.routing, RoutingHead::Friend { uin: FRIEND });
    assert_eq!(sent[0].request.random, receipt.source.random);
    assert_eq!(sent[0].sequence, receipt.source.sequence);
    assert_eq!(receipt.source.from, TEST_UIN);
    assert_eq!(receipt.source.target, FRIEND);
    assert_eq!(receipt.source.preview, "hello alice");

    bot.recall(&receipt.source).await.unwrap();
    assert!(server.sent_messages()[0].recalled);

    match bot.recall(&receipt.source).await {
        Err(ImbotError::Rejected { code, .. }) => assert_eq!(code, 1001),
        other => panic!("unexpected result {other:?}"),
    }
    bot.close().await;
}

#[tokio::test]
async fn test_recall_async_completes_deferred() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;

    let receipt = bot
        .send_message(MessageTarget::Group(GROUP), &"hi all".into())
        .await
        .unwrap();
    assert_eq!(
        server.sent_messages()[0].request.routing,
        RoutingHead::Group { code: GROUP }
    );

    let deferred = bot.recall_async(receipt.source.clone());
    let result = deferred.wait_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(result.is_ok());
    assert!(deferred.is_complete());
    assert!(server.sent_messages()[0].recalled);
    bot.close().await;
}

#[tokio::test]
async fn test_empty_message_is_rejected_locally() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;

    let err = bot
        .send_message(MessageTarget::Friend(FRIEND), &MessageChain::empty())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ImbotError::Message(MessageError::InvalidContent { .. })
    ));
    assert_eq!(server.request_count(commands::PB_SEND_MSG), 0);
    bot.close().await;
}

#[tokio::test]
async fn test_cancelled_pre_send_event_stops_the_send() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let (_observer, mut observed) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::MessagePreSend));
    let _veto = bot.events().subscribe(
        EventFilter::kind(EventKind::MessagePreSend),
        EventPriority::Normal,
        |envelope| {
            if let BotEvent::MessagePreSend { chain, .. } = envelope.event() {
                if chain.content_to_string().contains("secret") {
                    envelope.cancel();
                }
            }
            async { Ok(ListeningStatus::Listening) }
        },
    );

    let err = bot
        .send_message(MessageTarget::Group(GROUP), &"the secret plan".into())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ImbotError::Message(MessageError::SendCancelled { target: GROUP })
    ));
    assert_eq!(server.request_count(commands::PB_SEND_MSG), 0);
    // The monitor still saw the cancelled event
    assert!(matches!(
        next_event(&mut observed).await,
        BotEvent::MessagePreSend {
            target: MessageTarget::Group(GROUP),
            ..
        }
    ));

    bot.send_message(MessageTarget::Group(GROUP), &"lunch?".into())
        .await
        .unwrap();
    assert_eq!(server.request_count(commands::PB_SEND_MSG), 1);
    bot.close().await;
}

#[tokio::test]
async fn test_member_list_refresh() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;

    assert_eq!(bot.refresh_member_list(GROUP).await.unwrap(), 2);

    let member = bot.contacts().member(GROUP, MEMBER).unwrap();
    assert_eq!(member.card, "ferris");
    assert_eq!(member.display_name(), "ferris");
    assert_eq!(bot.contacts().members(GROUP).len(), 2);
    bot.close().await;
}

// ----------------------------------------------------------------------------
// Inbound
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_friend_message_is_pulled_after_notify() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let (_handle, mut events) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::FriendMessage));

    let record = server
        .push_friend_message(FRIEND, &"ping".into())
        .await
        .unwrap();

    match next_event(&mut events).await {
        BotEvent::FriendMessage(event) => {
            assert_eq!(event.sender, FRIEND);
            assert_eq!(event.sender_nick, "alice");
            assert_eq!(event.chain.content_to_string(), "ping");
            assert_eq!(event.source.sequence, record.sequence);
            assert_eq!(event.source.random, record.random);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(server.request_count(commands::PB_GET_MSG), 1);
    bot.close().await;
}

#[tokio::test]
async fn test_repeated_group_message_published_once() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let (_handle, mut events) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::GroupMessage));

    let first = server
        .push_group_message(GROUP, MEMBER, "ferris", &"first".into())
        .await
        .unwrap();
    server.repeat_group_message(&first).await.unwrap();
    server
        .push_group_message(GROUP, MEMBER, "ferris", &"second".into())
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            BotEvent::GroupMessage(event) => {
                assert_eq!(event.group, GROUP);
                assert_eq!(event.group_name, "rustaceans");
                assert_eq!(event.sender_card, "ferris");
                received.push(event.chain.content_to_string());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    // Pushes are handled on separate tasks
    received.sort();
    assert_eq!(received, vec!["first", "second"]);
    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    bot.close().await;
}

#[tokio::test]
async fn test_online_push_updates_contacts_and_is_acknowledged() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let (_handle, mut events) = bot.events().subscribe_channel(EventFilter::Kinds(vec![
        EventKind::MemberJoined,
        EventKind::MemberLeft,
        EventKind::MessageRecalled,
    ]));

    let joined = create_test_push_item(
        1,
        OnlinePushKind::MemberJoined {
            group_code: GROUP,
            member: 30_002,
            nick: "newbie".into(),
        },
    );
    server.push_online(vec![joined.clone()]).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::MemberJoined { group: GROUP, member: 30_002, .. }
    ));
    assert!(bot.contacts().member(GROUP, 30_002).is_some());
    assert!(
        server
            .wait_for_requests(commands::ONLINE_PUSH_RESP, 1, Duration::from_secs(1))
            .await
    );

    // A repeated item is acknowledged again but not republished
    server.push_online(vec![joined]).await.unwrap();
    assert!(
        server
            .wait_for_requests(commands::ONLINE_PUSH_RESP, 2, Duration::from_secs(1))
            .await
    );

    server
        .push_online(vec![
            create_test_push_item(
                2,
                OnlinePushKind::GroupRecall {
                    group_code: GROUP,
                    operator: MEMBER,
                    author: MEMBER,
                    sequence: 77,
                    random: 88,
                },
            ),
            create_test_push_item(
                3,
                OnlinePushKind::MemberLeft {
                    group_code: GROUP,
                    member: 30_002,
                    kicked_by: Some(TEST_UIN),
                },
            ),
        ])
        .await
        .unwrap();

    match next_event(&mut events).await {
        BotEvent::MessageRecalled(recall) => {
            assert_eq!(recall.target, GROUP);
            assert_eq!(recall.sequence, 77);
            assert_eq!(recall.random, 88);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::MemberLeft {
            member: 30_002,
            kicked_by: Some(TEST_UIN),
            ..
        }
    ));
    assert!(bot.contacts().member(GROUP, 30_002).is_none());
    bot.close().await;
}

#[tokio::test]
async fn test_pushed_server_list_replaces_valid_entries() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;

    server
        .push_server_list(vec![
            ServerEntry {
                ip: "10.0.0.2".into(),
                port: 8080,
            },
            ServerEntry {
                ip: "not-an-ip".into(),
                port: 8080,
            },
            ServerEntry {
                ip: "10.0.0.3".into(),
                port: 0,
            },
        ])
        .await
        .unwrap();

    assert!(
        server
            .wait_for_requests(commands::CONFIG_PUSH_RESP, 1, Duration::from_secs(1))
            .await
    );
    let handler = bot.selector().current().unwrap();
    assert_eq!(
        handler.processor().servers(),
        vec![ServerAddress::new("10.0.0.2", 8080)]
    );
    bot.close().await;
}

#[tokio::test]
async fn test_unsolicited_reply_is_dropped() {
    let server = MockServer::start(create_test_scenario());
    let bot = create_online_bot(&server).await;
    let (_handle, mut packets) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::PacketReceived));

    server
        .push(
            commands::STAT_SIMPLE_GET,
            &stat_svc::SimpleGetResponse { server_time: 1 },
        )
        .await
        .unwrap();

    // Heartbeat replies arrive on the same channel
    loop {
        if let BotEvent::PacketReceived { packet } = next_event(&mut packets).await {
            if matches!(
                packet.payload,
                PacketPayload::SimpleGet(stat_svc::SimpleGetResponse { server_time: 1 })
            ) {
                break;
            }
        }
    }
    assert!(bot.is_online());
    assert_eq!(bot.refresh_group_list().await.unwrap(), 1);
    bot.close().await;
}
