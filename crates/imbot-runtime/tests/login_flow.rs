//! Login flow against the in-process server
//!
//! Covers password and fast login, verification challenges answered through
//! events and through a custom solver, and login failures that must not be
//! retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use imbot_core::protocol::commands::{self, login::sub};
use imbot_core::{ImbotError, LoginError, Uin};
use imbot_harness::{
    init_test_logging, LoginChallenge, MockServer, Scenario, TEST_PASSWORD_MD5, TEST_UIN,
};
use imbot_runtime::{
    Account, Bot, BotEvent, Credentials, EventFilter, EventKind, HandlerState, InMemorySecretsStore,
    LoginSolver, Result, VerificationAnswer, VerificationChallenge,
};
use tokio::time::timeout;

fn create_test_bot(server: &MockServer) -> Bot {
    create_test_builder(server).build().expect("valid test configuration")
}

fn create_test_builder(server: &MockServer) -> imbot_runtime::BotBuilder {
    Bot::builder(Account::new(
        TEST_UIN,
        Credentials::PasswordMd5(TEST_PASSWORD_MD5),
    ))
    .with_config(server.config())
    .with_connector(server.connector())
}

/// Answers every challenge from a fixed script and records what it saw
struct ScriptedSolver {
    answers: Mutex<Vec<VerificationAnswer>>,
    seen: Mutex<Vec<VerificationChallenge>>,
}

impl ScriptedSolver {
    fn new(answers: Vec<VerificationAnswer>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().rev().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LoginSolver for ScriptedSolver {
    async fn solve(&self, _uin: Uin, challenge: VerificationChallenge) -> Result<VerificationAnswer> {
        self.seen.lock().unwrap().push(challenge);
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(VerificationAnswer::Declined))
    }
}

#[tokio::test]
async fn test_password_login_reaches_online() {
    init_test_logging();
    let server = MockServer::start(
        Scenario::default()
            .with_friends(20_000, 3)
            .with_group(100, "rustaceans", TEST_UIN),
    );
    let bot = create_test_bot(&server);
    let (_handle, mut online) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::BotOnline));

    bot.login().await.expect("login succeeds");

    assert!(bot.is_online());
    let handler = bot.selector().current().expect("handler installed");
    assert!(matches!(handler.state(), HandlerState::Ok));
    assert!(matches!(
        timeout(Duration::from_secs(1), online.recv()).await,
        Ok(Some(BotEvent::BotOnline { uin: TEST_UIN }))
    ));

    assert_eq!(server.request_count(commands::WTLOGIN_LOGIN), 1);
    assert_eq!(server.request_count(commands::STAT_REGISTER), 1);
    assert_eq!(bot.contacts().friend_count(), 3);
    assert_eq!(bot.contacts().group(100).map(|g| g.name), Some("rustaceans".to_string()));

    let trail: Vec<String> = handler
        .audit_trail()
        .iter()
        .map(|entry| entry.to_state.clone())
        .collect();
    assert_eq!(trail, vec!["Connecting", "Loading", "Ok"]);

    bot.close().await;
    assert!(!bot.is_online());
}

#[tokio::test]
async fn test_captcha_answered_through_event() {
    let server = MockServer::start(Scenario::default().with_challenge(
        LoginChallenge::PictureCaptcha {
            answer: "abcd".into(),
        },
    ));
    let bot = create_test_bot(&server);
    let (_handle, mut verification) = bot
        .events()
        .subscribe_channel(EventFilter::kind(EventKind::VerificationRequired));

    let login = tokio::spawn({
        let bot = bot.clone();
        async move { bot.login().await }
    });

    let event = timeout(Duration::from_secs(2), verification.recv())
        .await
        .expect("challenge published")
        .expect("channel open");
    let BotEvent::VerificationRequired {
        challenge,
        responder,
        ..
    } = event
    else {
        panic!("unexpected event {event:?}");
    };
    assert!(matches!(challenge, VerificationChallenge::PictureCaptcha { .. }));
    responder.complete(VerificationAnswer::Captcha("abcd".into()));

    login.await.unwrap().expect("login after captcha");
    assert!(bot.is_online());
    let subcommands: Vec<Option<u16>> = server
        .requests()
        .iter()
        .filter(|r| r.command == commands::WTLOGIN_LOGIN)
        .map(|r| r.subcommand)
        .collect();
    assert_eq!(subcommands, vec![Some(sub::PASSWORD), Some(sub::SUBMIT_CAPTCHA)]);
    bot.close().await;
}

#[tokio::test]
async fn test_sms_and_device_lock_with_custom_solver() {
    let server = MockServer::start(
        Scenario::default()
            .with_challenge(LoginChallenge::Sms {
                phone: "+86 138****0000".into(),
                code: "123456".into(),
            })
            .with_challenge(LoginChallenge::DeviceLock),
    );
    let solver = ScriptedSolver::new(vec![VerificationAnswer::SmsCode("123456".into())]);
    let bot = create_test_builder(&server)
        .with_login_solver(solver.clone())
        .build()
        .unwrap();

    bot.login().await.expect("login after sms");

    let seen = solver.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![VerificationChallenge::Sms {
            phone: "+86 138****0000".into()
        }]
    );
    let subcommands: Vec<Option<u16>> = server.requests().iter().map(|r| r.subcommand).collect();
    assert!(subcommands.contains(&Some(sub::REQUEST_SMS)));
    assert!(subcommands.contains(&Some(sub::SUBMIT_SMS)));
    assert!(subcommands.contains(&Some(sub::DEVICE_LOCK)));
    bot.close().await;
}

#[tokio::test]
async fn test_wrong_password_is_not_retried() {
    let server = MockServer::start(Scenario::new(TEST_UIN, [0x11; 16]));
    let bot = create_test_bot(&server);

    let err = bot.login().await.unwrap_err();
    match &err {
        ImbotError::Shared(cause) => assert!(matches!(
            **cause,
            ImbotError::Login(LoginError::WrongPassword { .. })
        )),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_recoverable());
    assert_eq!(server.connection_count(), 1);
    assert!(bot.selector().is_closed());
    assert!(matches!(
        bot.login().await,
        Err(ImbotError::SelectorClosed)
    ));
}

#[tokio::test]
async fn test_declined_verification_fails_login() {
    let server = MockServer::start(Scenario::default().with_challenge(
        LoginChallenge::SliderCaptcha {
            ticket: "t".into(),
        },
    ));
    let solver = ScriptedSolver::new(vec![VerificationAnswer::Declined]);
    let bot = create_test_builder(&server)
        .with_login_solver(solver)
        .build()
        .unwrap();

    let err = bot.login().await.unwrap_err();
    assert!(!err.is_recoverable());
    assert_eq!(server.login_count(), 0);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_retry_later_reconnects_and_logs_in() {
    let server = MockServer::start(Scenario::default().with_challenge(LoginChallenge::RetryLater));
    let bot = create_test_bot(&server);

    bot.login().await.expect("second attempt succeeds");

    assert_eq!(server.connection_count(), 2);
    assert_eq!(server.login_count(), 1);
    bot.close().await;
}

#[tokio::test]
async fn test_saved_secrets_enable_fast_login() {
    let server = MockServer::start(Scenario::default());
    let secrets = Arc::new(InMemorySecretsStore::new());

    let first = create_test_builder(&server)
        .with_secrets_store(secrets.clone())
        .build()
        .unwrap();
    first.login().await.unwrap();
    first.close().await;

    let second = create_test_builder(&server)
        .with_secrets_store(secrets.clone())
        .build()
        .unwrap();
    second.login().await.unwrap();

    assert_eq!(server.request_count(commands::WTLOGIN_LOGIN), 1);
    assert_eq!(server.request_count(commands::WTLOGIN_EXCHANGE_EMP), 1);
    assert_eq!(server.login_count(), 2);
    second.close().await;
}

#[tokio::test]
async fn test_rejected_fast_login_falls_back_to_password() {
    let server = MockServer::start(Scenario::default());
    let secrets = Arc::new(InMemorySecretsStore::new());

    let first = create_test_builder(&server)
        .with_secrets_store(secrets.clone())
        .build()
        .unwrap();
    first.login().await.unwrap();
    first.close().await;

    server.update_scenario(|scenario| scenario.reject_fast_login = true);
    let second = create_test_builder(&server)
        .with_secrets_store(secrets.clone())
        .build()
        .unwrap();
    second.login().await.unwrap();

    assert_eq!(server.request_count(commands::WTLOGIN_EXCHANGE_EMP), 1);
    assert_eq!(server.request_count(commands::WTLOGIN_LOGIN), 2);
    second.close().await;
}

#[tokio::test]
async fn test_session_only_account_without_secrets() {
    let server = MockServer::start(Scenario::default());
    let bot = Bot::builder(Account::new(TEST_UIN, Credentials::SessionOnly))
        .with_config(server.config())
        .with_connector(server.connector())
        .build()
        .unwrap();

    let err = bot.login().await.unwrap_err();
    assert!(matches!(
        &err,
        ImbotError::Shared(cause) if matches!(**cause, ImbotError::Login(LoginError::NoSavedSession { .. }))
    ));
}
