//! Connection loss and recovery against the in-process server

use std::sync::Arc;
use std::time::Duration;

use imbot_harness::{init_test_logging, MockServer, Scenario, TEST_PASSWORD_MD5, TEST_UIN};
use imbot_runtime::{
    Account, Bot, BotEvent, CloseReason, Credentials, EventFilter, EventKind, ImbotError,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_test::assert_ok;

fn create_test_bot(server: &MockServer) -> Bot {
    Bot::builder(Account::new(
        TEST_UIN,
        Credentials::PasswordMd5(TEST_PASSWORD_MD5),
    ))
    .with_config(server.config())
    .with_connector(server.connector())
    .build()
    .expect("valid test configuration")
}

fn lifecycle_events(bot: &Bot) -> (imbot_runtime::ListenerHandle, UnboundedReceiver<BotEvent>) {
    bot.events().subscribe_channel(EventFilter::Kinds(vec![
        EventKind::BotOffline,
        EventKind::BotRelogin,
    ]))
}

async fn next_event(events: &mut UnboundedReceiver<BotEvent>) -> BotEvent {
    timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("event in time")
        .expect("dispatcher alive")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_refused_connections_are_retried_with_backoff() {
    init_test_logging();
    let server = MockServer::start(Scenario::default());
    server.connector().fail_next(2);
    let bot = create_test_bot(&server);

    assert_ok!(bot.login().await);

    assert_eq!(server.connector().attempts(), 3);
    assert_eq!(server.connection_count(), 1);
    assert!(bot.is_online());
    bot.close().await;
}

#[tokio::test]
async fn test_exhausted_attempts_are_reported() {
    let server = MockServer::start(Scenario::default());
    server.connector().fail_next(u32::MAX);
    let bot = create_test_bot(&server);

    let err = bot.login().await.unwrap_err();
    assert!(matches!(err, ImbotError::ReconnectExhausted { attempts: 5 }));
    assert_eq!(server.connector().attempts(), 5);
    assert!(!bot.selector().is_closed());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_handler() {
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let selector = Arc::clone(bot.selector());

    let (first, second) = tokio::join!(selector.resumed_handler(), selector.resumed_handler());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.login_count(), 1);
    bot.close().await;
}

#[tokio::test]
async fn test_waiters_during_retry_share_the_replacement() {
    let server = MockServer::start(Scenario::default());
    server.connector().fail_next(1);
    let bot = create_test_bot(&server);
    let selector = Arc::clone(bot.selector());

    let (first, second, third) = tokio::join!(
        selector.resumed_handler(),
        selector.resumed_handler(),
        selector.resumed_handler()
    );
    let (first, second, third) = (first.unwrap(), second.unwrap(), third.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert!(first.is_online());
    assert_eq!(server.connector().attempts(), 2);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.login_count(), 1);
    bot.close().await;
}

#[tokio::test]
async fn test_exhaustion_reaches_every_waiter() {
    let server = MockServer::start(Scenario::default());
    server.connector().fail_next(u32::MAX);
    let bot = create_test_bot(&server);
    let selector = Arc::clone(bot.selector());

    let (first, second, third) = tokio::join!(
        selector.resumed_handler(),
        selector.resumed_handler(),
        selector.resumed_handler()
    );

    for result in [first, second, third] {
        assert!(matches!(
            result,
            Err(ImbotError::ReconnectExhausted { attempts: 5 })
        ));
    }
    assert_eq!(server.connector().attempts(), 5);
    assert!(!selector.is_closed());

    // A later caller starts a fresh series
    server.connector().fail_next(0);
    assert_ok!(selector.resumed_handler().await);
    assert_eq!(server.connector().attempts(), 6);
    bot.close().await;
}

#[tokio::test]
async fn test_missed_heartbeats_trigger_relogin() {
    init_test_logging();
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();
    let first = bot.selector().current().unwrap();

    server.drop_heartbeats(true);
    match next_event(&mut events).await {
        BotEvent::BotOffline {
            reason, reconnect, ..
        } => {
            assert!(matches!(reason, CloseReason::HeartbeatFailed(_)));
            assert!(reconnect);
        }
        other => panic!("unexpected event {other:?}"),
    }
    server.drop_heartbeats(false);

    match next_event(&mut events).await {
        BotEvent::BotRelogin { uin, cause } => {
            assert_eq!(uin, TEST_UIN);
            assert!(cause.is_some());
        }
        other => panic!("unexpected event {other:?}"),
    }
    let second = bot.selector().current().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first.state().is_closed());
    assert_eq!(server.connection_count(), 2);
    assert_eq!(server.login_count(), 2);
    bot.close().await;
}

#[tokio::test]
async fn test_server_closing_connection_triggers_reconnect() {
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();

    server.drop_connections().await;

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::BotOffline {
            reason: CloseReason::Transport(_),
            reconnect: true,
            ..
        }
    ));
    assert!(matches!(next_event(&mut events).await, BotEvent::BotRelogin { .. }));
    assert!(bot.is_online());
    assert_eq!(server.connection_count(), 2);
    bot.close().await;
}

#[tokio::test]
async fn test_expired_session_fails_pending_request_and_relogs() {
    let server = MockServer::start(Scenario::default().with_friends(20_000, 2));
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();

    server.expire_next_request();
    let err = bot.refresh_friend_list().await.unwrap_err();
    assert!(err.is_recoverable(), "unexpected error {err:?}");

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::BotOffline {
            reason: CloseReason::SessionInvalidated(_),
            reconnect: true,
            ..
        }
    ));
    assert!(matches!(next_event(&mut events).await, BotEvent::BotRelogin { .. }));
    assert_eq!(bot.refresh_friend_list().await.unwrap(), 2);
    bot.close().await;
}

#[tokio::test]
async fn test_msf_offline_reconnects() {
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();

    server.push_msf_offline("server maintenance").await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::BotOffline {
            reason: CloseReason::MsfOffline,
            reconnect: true,
            ..
        }
    ));
    assert!(matches!(next_event(&mut events).await, BotEvent::BotRelogin { .. }));
    assert_eq!(server.login_count(), 2);
    bot.close().await;
}

#[tokio::test]
async fn test_force_offline_stops_the_bot() {
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();

    server
        .push_force_offline("Offline", "Logged in on another device")
        .await
        .unwrap();

    match next_event(&mut events).await {
        BotEvent::BotOffline {
            reason: CloseReason::ForceOffline { title, message },
            reconnect,
            ..
        } => {
            assert_eq!(title, "Offline");
            assert_eq!(message, "Logged in on another device");
            assert!(!reconnect);
        }
        other => panic!("unexpected event {other:?}"),
    }
    wait_until(|| bot.selector().is_closed()).await;
    assert!(matches!(bot.login().await, Err(ImbotError::SelectorClosed)));
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_force_offline_reconnects_when_configured() {
    let server = MockServer::start(Scenario::default());
    let mut config = server.config();
    config.auto_reconnect_on_force_offline = true;
    let bot = Bot::builder(Account::new(
        TEST_UIN,
        Credentials::PasswordMd5(TEST_PASSWORD_MD5),
    ))
    .with_config(config)
    .with_connector(server.connector())
    .build()
    .unwrap();
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();

    server.push_force_offline("Offline", "kicked").await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::BotOffline {
            reconnect: true,
            ..
        }
    ));
    assert!(matches!(next_event(&mut events).await, BotEvent::BotRelogin { .. }));
    assert!(!bot.selector().is_closed());
    bot.close().await;
}

#[tokio::test]
async fn test_close_is_terminal_and_idempotent() {
    let server = MockServer::start(Scenario::default());
    let bot = create_test_bot(&server);
    let (_handle, mut events) = lifecycle_events(&bot);
    bot.login().await.unwrap();
    let handler = bot.selector().current().unwrap();

    bot.close().await;
    bot.close().await;

    assert!(matches!(
        next_event(&mut events).await,
        BotEvent::BotOffline {
            reason: CloseReason::UserRequested,
            reconnect: false,
            ..
        }
    ));
    assert!(matches!(handler.wait_closed().await, CloseReason::UserRequested));
    assert!(bot.selector().current().is_none());
    assert!(matches!(
        bot.send_message(imbot_runtime::MessageTarget::Friend(1), &"hi".into())
            .await,
        Err(ImbotError::SelectorClosed)
    ));
    assert_eq!(server.connection_count(), 1);
}
