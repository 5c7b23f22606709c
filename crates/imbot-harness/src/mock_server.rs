//! In-process SSO server
//!
//! Accepts connections from the [`MemoryConnector`] it hands out, answers
//! login, presence, contact and message commands according to a
//! [`Scenario`], and records every request so tests can assert on traffic.
//! Pushes go to the most recent live connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use imbot_core::config::{BotConfiguration, ServerAddress};
use imbot_core::crypto::EcdhKeyPair;
use imbot_core::errors::{ImbotError, Result, TransportError};
use imbot_core::message::{ComposeContext, MessageChain, MessageProtocolFacade, MessageTarget};
use imbot_core::protocol::commands::config_push::{ConfigPushKind, ConfigPushRequest, ServerEntry};
use imbot_core::protocol::commands::friendlist::{
    FriendListRequest, FriendListResponse, GroupListResponse, MemberListRequest,
    MemberListResponse,
};
use imbot_core::protocol::commands::login::{
    self, result, sub, tag, LoginRequestBody, LoginResponse, LoginSuccess, RETRY_LATER_CODE,
};
use imbot_core::protocol::commands::message_svc::{
    ForceOfflinePush, GetMessageRequest, GetMessageResponse, MessageRecord, PushNotify,
    RecallRequest, RecallResponse, SendMessageRequest, SendMessageResponse,
};
use imbot_core::protocol::commands::online_push::{
    GroupMessagePush, OnlinePushItem, OnlinePushRequest,
};
use imbot_core::protocol::commands::stat_svc::{
    AliveResponse, MsfOfflinePush, RegisterResponse, SimpleGetResponse,
};
use imbot_core::protocol::commands as cmd;
use imbot_core::protocol::io::ByteWriter;
use imbot_core::protocol::packet::FrameKind;
use imbot_core::protocol::tlv::TlvBlock;
use imbot_core::protocol::wire::SESSION_EXPIRED_CODE;
use imbot_core::transport::{memory_network, MemoryConnector, MemoryListener, MemoryTransport, Transport};
use imbot_core::types::{GroupCode, SequenceId, Timestamp, Uin};
use imbot_core::utils::{random_key, random_u32};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frames::{self, IncomingRequest, SessionKeys};
use crate::scenario::{LoginChallenge, Scenario};

/// A request as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    pub connection: u32,
    pub command: String,
    pub sequence: SequenceId,
    /// Login sub-command, for `wtlogin.*` requests
    pub subcommand: Option<u16>,
}

/// A message the client sent through `MessageSvc.PbSendMsg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub request: SendMessageRequest,
    pub sequence: u32,
    pub recalled: bool,
}

struct Connection {
    id: u32,
    address: ServerAddress,
    transport: MemoryTransport,
}

#[derive(Default)]
struct LoginState {
    issued: Option<LoginSuccess>,
    keys: SessionKeys,
    logins: u32,
}

struct ServerState {
    ecdh: EcdhKeyPair,
    scenario: Mutex<Scenario>,
    login: Mutex<LoginState>,
    connections: Mutex<Vec<Arc<Connection>>>,
    requests: Mutex<Vec<ReceivedRequest>>,
    sent: Mutex<Vec<SentMessage>>,
    inbox: Mutex<Vec<MessageRecord>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    activity: Notify,
    next_connection: AtomicU32,
    push_sequence: AtomicU32,
    message_sequence: AtomicU32,
    sync_generation: AtomicU32,
    drop_heartbeats: AtomicBool,
    expire_next_request: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Server Handle
// ----------------------------------------------------------------------------

pub struct MockServer {
    state: Arc<ServerState>,
    connector: Arc<MemoryConnector>,
    address: ServerAddress,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Start accepting connections; must be called inside a tokio runtime
    pub fn start(scenario: Scenario) -> Self {
        let (connector, listener) = memory_network();
        let state = Arc::new(ServerState {
            ecdh: EcdhKeyPair::generate(),
            scenario: Mutex::new(scenario),
            login: Mutex::new(LoginState::default()),
            connections: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            activity: Notify::new(),
            next_connection: AtomicU32::new(1),
            push_sequence: AtomicU32::new(50_000),
            message_sequence: AtomicU32::new(1),
            sync_generation: AtomicU32::new(0),
            drop_heartbeats: AtomicBool::new(false),
            expire_next_request: AtomicBool::new(false),
        });
        let accept_task = tokio::spawn(accept_loop(Arc::clone(&state), listener));
        Self {
            state,
            connector,
            address: ServerAddress::new("127.0.0.1", 8080),
            accept_task,
        }
    }

    pub fn connector(&self) -> Arc<MemoryConnector> {
        Arc::clone(&self.connector)
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        *self.state.ecdh.public_key()
    }

    /// Test configuration pointed at this server
    pub fn config(&self) -> BotConfiguration {
        let mut config = BotConfiguration::testing();
        config.servers = vec![self.address.clone()];
        config.server_public_key = self.public_key();
        config
    }

    pub fn uin(&self) -> Uin {
        lock(&self.state.scenario).uin
    }

    /// Change the scenario for requests that arrive from now on
    pub fn update_scenario<F: FnOnce(&mut Scenario)>(&self, update: F) {
        update(&mut lock(&self.state.scenario));
    }

    // ------------------------------------------------------------------
    // Behaviour switches
    // ------------------------------------------------------------------

    /// Stop answering heartbeats
    pub fn drop_heartbeats(&self, drop: bool) {
        self.state.drop_heartbeats.store(drop, Ordering::SeqCst);
    }

    /// Answer the next uni request with the session-expired code
    pub fn expire_next_request(&self) {
        self.state.expire_next_request.store(true, Ordering::SeqCst);
    }

    /// Close every live connection from the server side
    pub async fn drop_connections(&self) {
        let connections: Vec<Arc<Connection>> = lock(&self.state.connections).clone();
        for connection in connections {
            let _ = connection.transport.close().await;
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        lock(&self.state.requests).clone()
    }

    pub fn request_count(&self, command: &str) -> usize {
        lock(&self.state.requests)
            .iter()
            .filter(|r| r.command == command)
            .count()
    }

    /// Wait until `count` requests for `command` have arrived in total
    pub async fn wait_for_requests(&self, command: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.state.activity.notified();
            if self.request_count(command) >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.request_count(command) >= count;
            }
        }
    }

    /// Connections accepted so far, closed ones included
    pub fn connection_count(&self) -> u32 {
        self.state.next_connection.load(Ordering::SeqCst) - 1
    }

    /// Successful logins and key refreshes
    pub fn login_count(&self) -> u32 {
        lock(&self.state.login).logins
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        lock(&self.state.sent).clone()
    }

    /// Session material of the last successful login
    pub fn issued(&self) -> Option<LoginSuccess> {
        lock(&self.state.login).issued.clone()
    }

    // ------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------

    /// Push a bincode body to the newest live connection
    pub async fn push<T: Serialize>(&self, command: &str, body: &T) -> Result<()> {
        self.state.push(command, bincode::serialize(body)?).await
    }

    /// Store a friend message and notify the client to pull it
    pub async fn push_friend_message(&self, from: Uin, chain: &MessageChain) -> Result<MessageRecord> {
        let uin = self.uin();
        let elems = compose(chain, MessageTarget::Friend(uin))?;
        let record = MessageRecord {
            from_uin: from,
            to_uin: uin,
            sequence: self.state.message_sequence.fetch_add(1, Ordering::SeqCst),
            random: random_u32(),
            time: Timestamp::now().as_secs(),
            elems,
        };
        lock(&self.state.inbox).push(record.clone());
        self.push(
            cmd::PUSH_NOTIFY,
            &PushNotify {
                uin,
                message_type: 0,
            },
        )
        .await?;
        Ok(record)
    }

    pub async fn push_group_message(
        &self,
        group: GroupCode,
        from: Uin,
        card: &str,
        chain: &MessageChain,
    ) -> Result<GroupMessagePush> {
        let group_name = lock(&self.state.scenario)
            .groups
            .iter()
            .find(|g| g.code == group)
            .map(|g| g.name.clone())
            .unwrap_or_default();
        let push = GroupMessagePush {
            group_code: group,
            group_name,
            from_uin: from,
            sender_card: card.into(),
            sequence: self.state.message_sequence.fetch_add(1, Ordering::SeqCst),
            random: random_u32(),
            time: Timestamp::now().as_secs(),
            elems: compose(chain, MessageTarget::Group(group))?,
        };
        self.push(cmd::PUSH_GROUP_MSG, &push).await?;
        Ok(push)
    }

    /// Push the same group message again, as the server does on flaky links
    pub async fn repeat_group_message(&self, push: &GroupMessagePush) -> Result<()> {
        self.push(cmd::PUSH_GROUP_MSG, push).await
    }

    pub async fn push_online(&self, items: Vec<OnlinePushItem>) -> Result<OnlinePushRequest> {
        let request = OnlinePushRequest {
            uin: self.uin(),
            sequence: self.state.push_sequence.fetch_add(1, Ordering::SeqCst),
            items,
        };
        self.push(cmd::ONLINE_PUSH_REQ, &request).await?;
        Ok(request)
    }

    pub async fn push_force_offline(&self, title: &str, tips: &str) -> Result<()> {
        let push = ForceOfflinePush {
            uin: self.uin(),
            title: title.into(),
            tips: tips.into(),
        };
        self.push(cmd::PUSH_FORCE_OFFLINE, &push).await
    }

    pub async fn push_msf_offline(&self, info: &str) -> Result<()> {
        let push = MsfOfflinePush {
            uin: self.uin(),
            sequence: u64::from(self.state.push_sequence.fetch_add(1, Ordering::SeqCst)),
            title: "offline".into(),
            info: info.into(),
        };
        self.push(cmd::STAT_MSF_OFFLINE, &push).await
    }

    pub async fn push_server_list(&self, servers: Vec<ServerEntry>) -> Result<()> {
        let request = ConfigPushRequest {
            sequence: u64::from(self.state.push_sequence.fetch_add(1, Ordering::SeqCst)),
            kind: ConfigPushKind::ServerList(servers),
        };
        self.push(cmd::CONFIG_PUSH_REQ, &request).await
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        for task in lock(&self.state.tasks).drain(..) {
            task.abort();
        }
    }
}

fn compose(chain: &MessageChain, target: MessageTarget) -> Result<Vec<u8>> {
    MessageProtocolFacade::default().compose_bytes(chain, &ComposeContext::new(target))
}

// ----------------------------------------------------------------------------
// Connection Handling
// ----------------------------------------------------------------------------

async fn accept_loop(state: Arc<ServerState>, mut listener: MemoryListener) {
    while let Some(accepted) = listener.accept().await {
        let connection = Arc::new(Connection {
            id: state.next_connection.fetch_add(1, Ordering::SeqCst),
            address: accepted.address,
            transport: accepted.transport,
        });
        info!(connection = connection.id, address = %connection.address, "Accepted connection");
        lock(&state.connections).push(Arc::clone(&connection));
        state.activity.notify_waiters();

        let task = tokio::spawn(serve(Arc::clone(&state), connection));
        lock(&state.tasks).push(task);
    }
}

async fn serve(state: Arc<ServerState>, connection: Arc<Connection>) {
    loop {
        let bytes = match connection.transport.receive().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                warn!(connection = connection.id, error = %e, "Receive failed");
                break;
            }
        };
        match state.handle(&connection, &bytes) {
            Ok(Some(reply)) => {
                if let Err(e) = connection.transport.send(reply).await {
                    warn!(connection = connection.id, error = %e, "Reply failed");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(connection = connection.id, error = %e, "Request rejected"),
        }
    }

    debug!(connection = connection.id, "Connection closed");
    lock(&state.connections).retain(|c| c.id != connection.id);
    state.activity.notify_waiters();
}

enum UniReply {
    Body(Vec<u8>),
    Silent,
}

fn encode<T: Serialize>(value: &T) -> Result<UniReply> {
    Ok(UniReply::Body(bincode::serialize(value)?))
}

impl ServerState {
    fn handle(&self, connection: &Connection, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let keys = lock(&self.login).keys;
        let request = frames::open_request(bytes, &self.ecdh, &keys)?;
        let login = match request.kind {
            FrameKind::Login => Some(LoginRequestBody::decode(&request.body)?),
            FrameKind::Uni => None,
        };
        debug!(
            connection = connection.id,
            command = %request.command,
            sequence = %request.sequence,
            "Request"
        );
        lock(&self.requests).push(ReceivedRequest {
            connection: connection.id,
            command: request.command.clone(),
            sequence: request.sequence,
            subcommand: login.as_ref().map(|body| body.subcommand),
        });
        self.activity.notify_waiters();

        match login {
            Some(body) => {
                let reply = self.handle_login(&request, body)?;
                frames::login_reply(&request, &self.ecdh, &reply).map(Some)
            }
            None => {
                let key = lock(&self.login)
                    .keys
                    .current
                    .ok_or_else(|| ImbotError::invalid_packet("no session"))?;
                if self.expire_next_request.swap(false, Ordering::SeqCst) {
                    return frames::uni_frame(
                        request.sequence,
                        &request.command,
                        request.uin,
                        SESSION_EXPIRED_CODE,
                        Vec::new(),
                        &key,
                    )
                    .map(Some);
                }
                match self.handle_uni(&request)? {
                    UniReply::Body(body) => frames::uni_frame(
                        request.sequence,
                        &request.command,
                        request.uin,
                        0,
                        body,
                        &key,
                    )
                    .map(Some),
                    UniReply::Silent => Ok(None),
                }
            }
        }
    }

    async fn push(&self, command: &str, body: Vec<u8>) -> Result<()> {
        let key = lock(&self.login)
            .keys
            .current
            .ok_or_else(|| ImbotError::invalid_packet("push before login"))?;
        let connection = lock(&self.connections)
            .last()
            .cloned()
            .ok_or(ImbotError::Transport(TransportError::ConnectionClosed))?;
        let uin = lock(&self.scenario).uin;
        let sequence = SequenceId(self.push_sequence.fetch_add(1, Ordering::SeqCst));
        let frame = frames::uni_frame(sequence, command, uin, 0, body, &key)?;
        debug!(connection = connection.id, command, %sequence, "Push");
        connection.transport.send(frame).await
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    fn handle_login(&self, request: &IncomingRequest, body: LoginRequestBody) -> Result<Vec<u8>> {
        let random_key = request
            .envelope
            .as_ref()
            .map(|envelope| envelope.random_key)
            .ok_or_else(|| ImbotError::invalid_packet("login without envelope"))?;
        let mut scenario = lock(&self.scenario);
        let front = scenario.challenges.front().cloned();

        match body.subcommand {
            sub::PASSWORD => {
                let t106 = body.tlvs.get(tag::T106).unwrap_or_default();
                if request.uin != scenario.uin
                    || !login::verify_t106(t106, &scenario.password_md5, request.uin)
                {
                    error_response(body.subcommand, 1, "Login failed", "wrong password")
                } else {
                    match front {
                        Some(LoginChallenge::RetryLater) => {
                            scenario.challenges.pop_front();
                            error_response(body.subcommand, RETRY_LATER_CODE, "Busy", "retry later")
                        }
                        Some(challenge) => challenge_response(body.subcommand, &challenge),
                        None => self.success(body.subcommand, &scenario, &random_key, None),
                    }
                }
            }
            sub::SUBMIT_CAPTCHA => {
                let passed = match &front {
                    Some(LoginChallenge::PictureCaptcha { answer }) => {
                        body.captcha_answer().as_ref() == Some(answer)
                    }
                    Some(LoginChallenge::SliderCaptcha { ticket })
                    | Some(LoginChallenge::UnsafeDevice { ticket }) => {
                        body.ticket().as_ref() == Some(ticket)
                    }
                    _ => false,
                };
                self.advance(body.subcommand, &mut scenario, passed, front, &random_key)
            }
            sub::REQUEST_SMS => match &front {
                Some(challenge @ LoginChallenge::Sms { .. }) => {
                    challenge_response(body.subcommand, challenge)
                }
                _ => error_response(body.subcommand, 2, "SMS", "no verification pending"),
            },
            sub::SUBMIT_SMS => {
                let passed = matches!(
                    &front,
                    Some(LoginChallenge::Sms { code, .. }) if body.sms_code().as_ref() == Some(code)
                );
                if !passed && matches!(front, Some(LoginChallenge::Sms { .. })) {
                    error_response(body.subcommand, 3, "SMS", "wrong verification code")
                } else {
                    self.advance(body.subcommand, &mut scenario, passed, front, &random_key)
                }
            }
            sub::DEVICE_LOCK => {
                let passed = matches!(front, Some(LoginChallenge::DeviceLock));
                self.advance(body.subcommand, &mut scenario, passed, front, &random_key)
            }
            sub::FAST_LOGIN => {
                let issued = lock(&self.login).issued.clone();
                let a1 = body.tlvs.get(tag::T106).unwrap_or_default();
                match issued {
                    Some(issued) if !scenario.reject_fast_login && issued.a1 == a1 => {
                        self.success(body.subcommand, &scenario, &random_key, Some(&issued))
                    }
                    _ => error_response(body.subcommand, 4, "Login failed", "session expired"),
                }
            }
            sub::REFRESH_KEYS => {
                let issued = lock(&self.login).issued.clone();
                let tgt = body.tlvs.get(tag::T10A).unwrap_or_default();
                match issued {
                    Some(issued) if issued.tgt == tgt => {
                        self.success(body.subcommand, &scenario, &random_key, Some(&issued))
                    }
                    _ => error_response(body.subcommand, 5, "Refresh failed", "unknown ticket"),
                }
            }
            other => error_response(other, 6, "Login failed", "unsupported sub-command"),
        }
    }

    /// Move past the front challenge if it was answered, else ask again
    fn advance(
        &self,
        subcommand: u16,
        scenario: &mut Scenario,
        passed: bool,
        front: Option<LoginChallenge>,
        random_key: &[u8; 16],
    ) -> Result<Vec<u8>> {
        if !passed {
            return match front {
                Some(challenge) => challenge_response(subcommand, &challenge),
                None => error_response(subcommand, 2, "Login failed", "no verification pending"),
            };
        }
        scenario.challenges.pop_front();
        match scenario.challenges.front() {
            Some(next) => challenge_response(subcommand, next),
            None => self.success(subcommand, scenario, random_key, None),
        }
    }

    /// Issue session material; `previous` keeps the long-lived signatures
    fn success(
        &self,
        subcommand: u16,
        scenario: &Scenario,
        random_key: &[u8; 16],
        previous: Option<&LoginSuccess>,
    ) -> Result<Vec<u8>> {
        let success = LoginSuccess {
            tgt: previous.map_or_else(random_key_vec, |p| p.tgt.clone()),
            d2: random_key_vec(),
            d2_key: imbot_core::utils::random_key(),
            wt_session_ticket: random_key_vec(),
            wt_session_ticket_key: imbot_core::utils::random_key(),
            a1: previous.map_or_else(random_key_vec, |p| p.a1.clone()),
            no_pic_sig: previous.map_or_else(random_key_vec, |p| p.no_pic_sig.clone()),
            nick: scenario.nick.clone(),
        };
        let mut block = TlvBlock::new();
        block.push(tag::T119, success.seal(random_key)?);

        let mut state = lock(&self.login);
        state.keys = SessionKeys {
            current: Some(success.d2_key),
            previous: state.keys.current,
        };
        state.issued = Some(success);
        state.logins += 1;
        info!(uin = scenario.uin, logins = state.logins, "Issued session");

        LoginResponse {
            subcommand,
            result: result::SUCCESS,
            tlvs: Default::default(),
        }
        .encode(&block)
    }

    // ------------------------------------------------------------------
    // Application commands
    // ------------------------------------------------------------------

    fn handle_uni(&self, request: &IncomingRequest) -> Result<UniReply> {
        let heartbeats_dropped = self.drop_heartbeats.load(Ordering::SeqCst);
        match request.command.as_str() {
            cmd::STAT_REGISTER => {
                let scenario = lock(&self.scenario);
                let (result, message) = if scenario.reject_register {
                    (1, "register rejected")
                } else {
                    (0, "")
                };
                encode(&RegisterResponse {
                    result,
                    message: message.into(),
                    client_ip: 0x7f00_0001,
                    server_time: Timestamp::now().as_secs(),
                })
            }
            cmd::STAT_SIMPLE_GET | cmd::HEARTBEAT_ALIVE if heartbeats_dropped => {
                debug!(command = %request.command, "Dropping heartbeat");
                Ok(UniReply::Silent)
            }
            cmd::STAT_SIMPLE_GET => encode(&SimpleGetResponse {
                server_time: Timestamp::now().as_secs(),
            }),
            cmd::HEARTBEAT_ALIVE => encode(&AliveResponse),
            cmd::FRIEND_LIST => {
                let page: FriendListRequest = bincode::deserialize(&request.body)?;
                let scenario = lock(&self.scenario);
                let friends = scenario
                    .friends
                    .iter()
                    .skip(page.start_index as usize)
                    .take(page.count as usize)
                    .cloned()
                    .collect();
                encode(&FriendListResponse {
                    total: scenario.friends.len() as u32,
                    friends,
                })
            }
            cmd::GROUP_LIST => encode(&GroupListResponse {
                groups: lock(&self.scenario).groups.clone(),
            }),
            cmd::MEMBER_LIST => {
                let page: MemberListRequest = bincode::deserialize(&request.body)?;
                let members = lock(&self.scenario)
                    .members
                    .get(&page.group_code)
                    .cloned()
                    .unwrap_or_default();
                encode(&MemberListResponse {
                    group_code: page.group_code,
                    members,
                    next_uin: 0,
                })
            }
            cmd::PB_SEND_MSG => {
                let message: SendMessageRequest = bincode::deserialize(&request.body)?;
                let sequence = self.message_sequence.fetch_add(1, Ordering::SeqCst);
                let send_time = message.time;
                lock(&self.sent).push(SentMessage {
                    request: message,
                    sequence,
                    recalled: false,
                });
                encode(&SendMessageResponse {
                    result: 0,
                    message: String::new(),
                    sequence,
                    send_time,
                })
            }
            cmd::PB_MSG_WITHDRAW => {
                let recall: RecallRequest = bincode::deserialize(&request.body)?;
                let (sequence, random) = match recall {
                    RecallRequest::Friend {
                        sequence, random, ..
                    }
                    | RecallRequest::Group {
                        sequence, random, ..
                    } => (sequence, random),
                };
                let mut sent = lock(&self.sent);
                let found = sent
                    .iter_mut()
                    .find(|m| m.sequence == sequence && m.request.random == random && !m.recalled);
                let response = match found {
                    Some(message) => {
                        message.recalled = true;
                        RecallResponse {
                            result: 0,
                            message: String::new(),
                        }
                    }
                    None => RecallResponse {
                        result: 1001,
                        message: "message not found".into(),
                    },
                };
                encode(&response)
            }
            cmd::PB_GET_MSG => {
                let _: GetMessageRequest = bincode::deserialize(&request.body)?;
                let messages = std::mem::take(&mut *lock(&self.inbox));
                let generation = self.sync_generation.fetch_add(1, Ordering::SeqCst) + 1;
                encode(&GetMessageResponse {
                    sync_cookie: generation.to_be_bytes().to_vec(),
                    messages,
                })
            }
            cmd::ONLINE_PUSH_RESP | cmd::CONFIG_PUSH_RESP | cmd::STAT_MSF_OFFLINE_RESP => {
                Ok(UniReply::Silent)
            }
            other => {
                debug!(command = other, "No handler for command");
                Ok(UniReply::Silent)
            }
        }
    }
}

fn random_key_vec() -> Vec<u8> {
    random_key().to_vec()
}

fn error_response(subcommand: u16, code: u32, title: &str, message: &str) -> Result<Vec<u8>> {
    let mut t146 = ByteWriter::new();
    t146.write_u32(code)
        .write_u16_lv(title.as_bytes())
        .write_u16_lv(message.as_bytes());
    let mut block = TlvBlock::new();
    block.push(tag::T146, t146.into_bytes());
    LoginResponse {
        subcommand,
        result: result::ERROR,
        tlvs: Default::default(),
    }
    .encode(&block)
}

fn challenge_response(subcommand: u16, challenge: &LoginChallenge) -> Result<Vec<u8>> {
    let t104 = vec![0x10, 0x04];
    let mut block = TlvBlock::new();
    let result = match challenge {
        LoginChallenge::PictureCaptcha { .. } => {
            let mut t105 = ByteWriter::new();
            t105.write_u16_lv(b"sign").write_u16_lv(b"\x89PNG captcha");
            block.push(tag::T105, t105.into_bytes());
            result::CAPTCHA
        }
        LoginChallenge::SliderCaptcha { .. } => {
            block.push(tag::T192, b"https://captcha.example/slider".to_vec());
            result::CAPTCHA
        }
        LoginChallenge::UnsafeDevice { .. } => {
            block.push(tag::T204, b"https://verify.example/device".to_vec());
            result::UNSAFE_DEVICE
        }
        LoginChallenge::Sms { phone, .. } => {
            block
                .push(tag::T174, vec![0x17, 0x04])
                .push(tag::T178, phone.as_bytes().to_vec());
            result::UNSAFE_DEVICE
        }
        LoginChallenge::DeviceLock => {
            block.push(tag::T402, vec![0x40, 0x02]);
            result::DEVICE_LOCK
        }
        LoginChallenge::RetryLater => {
            return error_response(subcommand, RETRY_LATER_CODE, "Busy", "retry later");
        }
    };
    block.push(tag::T104, t104);
    LoginResponse {
        subcommand,
        result,
        tlvs: Default::default(),
    }
    .encode(&block)
}
