//! SSO session processor
//!
//! One [`SsoProcessor`] exists per network handler. It owns the
//! [`SessionContext`]: key material, the sequence counter, the login auth state
//! and the table of requests waiting for a reply. Outgoing frames are wrapped
//! (sequence bound, sealed, outer frame added) and incoming bytes are unwrapped
//! and decoded through the shared codec registry.
//!
//! Each processor owns its own outstanding-request table, so a reply that
//! arrives for a previous session can never be matched here.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hashbrown::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::account::{Account, AccountSecrets, DeviceInfo};
use crate::config::{BotConfiguration, HeartbeatConfig, ProtocolInfo, ServerAddress};
use crate::crypto::{tea, EcdhKeyPair, EMPTY_KEY};
use crate::errors::{ImbotError, Result, SessionError, SharedError};
use crate::protocol::codec::PacketCodecRegistry;
use crate::protocol::commands::login::{LoginContext, LoginSuccess};
use crate::protocol::packet::{EncodedFrame, Encryption, FrameKind, OutgoingRequest, Packet, PacketKind};
use crate::protocol::wire::{
    envelope_method, EnvelopeRequest, EnvelopeResponse, RequestFrame, RequestSso, ResponseFrame,
    ResponseSso,
};
use crate::types::{SequenceId, Uin};
use crate::utils::{random_in_range, random_key};

// ----------------------------------------------------------------------------
// Sequence Numbers
// ----------------------------------------------------------------------------

/// Largest sequence number before wrapping
pub const SEQUENCE_LIMIT: u32 = 100_000;
/// Wrapped sequences restart in `[SEQUENCE_WRAP_LOW, SEQUENCE_LIMIT)`
pub const SEQUENCE_WRAP_LOW: u32 = 60_000;
const SEQUENCE_STEP: u32 = 2;

/// Monotonic per-session sequence allocator
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    current: u32,
}

impl SequenceCounter {
    pub fn new(start: Option<u32>) -> Self {
        let current = start.unwrap_or_else(|| random_in_range(SEQUENCE_WRAP_LOW, SEQUENCE_LIMIT));
        Self { current }
    }

    pub fn next(&mut self) -> SequenceId {
        self.current += SEQUENCE_STEP;
        if self.current > SEQUENCE_LIMIT {
            self.current = random_in_range(SEQUENCE_WRAP_LOW, SEQUENCE_LIMIT);
        }
        SequenceId(self.current)
    }

    pub fn current(&self) -> SequenceId {
        SequenceId(self.current)
    }
}

// ----------------------------------------------------------------------------
// Auth State
// ----------------------------------------------------------------------------

/// Login progress of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// A login request was sent
    Begin,
    /// The server asked for verification
    Challenge,
    /// The server refused the login attempt
    Rejected,
    /// Session keys were installed
    Success,
    /// Force offline or undecryptable traffic
    Invalidate,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AuthState {
    pub fn transition(self, event: AuthEvent) -> Result<AuthState> {
        use AuthEvent::*;
        use AuthState::*;

        match (self, event) {
            (Invalidated, _) => Err(invalid_auth(self, event)),
            (_, Invalidate) => Ok(Invalidated),
            (Unauthenticated, Begin) => Ok(Authenticating),
            (Authenticating, Challenge) | (Authenticating, Rejected) => Ok(Unauthenticated),
            (Authenticating, Success) => Ok(Authenticated),
            // Key refresh while online
            (Authenticated, Success) => Ok(Authenticated),
            _ => Err(invalid_auth(self, event)),
        }
    }
}

fn invalid_auth(from: AuthState, event: AuthEvent) -> ImbotError {
    SessionError::InvalidAuthState {
        from: from.to_string(),
        event: format!("{:?}", event),
    }
    .into()
}

// ----------------------------------------------------------------------------
// Session Context
// ----------------------------------------------------------------------------

/// Session keys issued by the server
#[derive(Clone, Default)]
struct Signatures {
    tgt: Vec<u8>,
    d2: Vec<u8>,
    d2_key: Option<[u8; 16]>,
    wt_session_ticket: Vec<u8>,
    wt_session_ticket_key: Option<[u8; 16]>,
    a1: Vec<u8>,
    no_pic_sig: Vec<u8>,
}

/// Reply delivered to a waiting request
pub type ReplyResult = core::result::Result<Packet, SharedError>;

struct Outstanding {
    command: String,
    reply: oneshot::Sender<ReplyResult>,
}

/// Mutable state of one session, owned by its processor
pub struct SessionContext {
    account: Account,
    device: DeviceInfo,
    protocol: ProtocolInfo,
    random_key: [u8; 16],
    ecdh: EcdhKeyPair,
    share_key: [u8; 16],
    signatures: Signatures,
    previous_d2_key: Option<([u8; 16], Instant)>,
    rotation_grace: Duration,
    session_id: [u8; 4],
    ksid: Vec<u8>,
    sequence: SequenceCounter,
    heartbeat: HeartbeatConfig,
    servers: Vec<ServerAddress>,
    auth: AuthState,
    outstanding: HashMap<SequenceId, Outstanding>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("uin", &self.account.uin)
            .field("auth", &self.auth)
            .field("sequence", &self.sequence.current())
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

impl SessionContext {
    fn new(config: &BotConfiguration, account: Account, device: DeviceInfo) -> Self {
        let ecdh = EcdhKeyPair::generate();
        let share_key = ecdh.share_key(&config.server_public_key);
        let session_id = rand_session_id();
        Self {
            account,
            protocol: config.protocol.info(),
            random_key: random_key(),
            ksid: format!("|{}|A8.2.7.27f6ea96", device.imei).into_bytes(),
            device,
            ecdh,
            share_key,
            signatures: Signatures::default(),
            previous_d2_key: None,
            rotation_grace: config.key_refresh.rotation_grace,
            session_id,
            sequence: SequenceCounter::new(config.initial_sequence),
            heartbeat: config.heartbeat.clone(),
            servers: config.servers.clone(),
            auth: AuthState::Unauthenticated,
            outstanding: HashMap::new(),
        }
    }

    fn key_for(&self, encryption: Encryption) -> Result<Option<[u8; 16]>> {
        match encryption {
            Encryption::None => Ok(None),
            Encryption::EmptyKey => Ok(Some(EMPTY_KEY)),
            Encryption::D2Key => self
                .signatures
                .d2_key
                .map(Some)
                .ok_or(ImbotError::Session(SessionError::MissingKey { what: "d2 key" })),
        }
    }

    fn within_grace(&self) -> bool {
        self.previous_d2_key
            .map(|(_, rotated_at)| rotated_at.elapsed() <= self.rotation_grace)
            .unwrap_or(false)
    }
}

fn rand_session_id() -> [u8; 4] {
    crate::utils::random_u32().to_be_bytes()
}

// ----------------------------------------------------------------------------
// Processor
// ----------------------------------------------------------------------------

/// A request ready for the transport
#[derive(Debug)]
pub struct WrappedRequest {
    pub sequence: SequenceId,
    pub command: String,
    pub bytes: Vec<u8>,
    /// Present when the request expects a reply
    pub reply: Option<oneshot::Receiver<ReplyResult>>,
}

/// Where an incoming packet went
#[derive(Debug)]
pub enum Routed {
    /// Handed to the waiting request
    Delivered,
    /// Reply with no matching request; dropped
    Discarded(Packet),
    /// Server initiated, or unknown; goes to the packet handler
    Push(Packet),
}

/// Session wrapper/unwrapper for one connection
pub struct SsoProcessor {
    registry: Arc<PacketCodecRegistry>,
    context: Mutex<SessionContext>,
}

impl fmt::Debug for SsoProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoProcessor")
            .field("context", &*self.lock())
            .finish()
    }
}

impl SsoProcessor {
    pub fn new(
        config: &BotConfiguration,
        account: Account,
        device: DeviceInfo,
        registry: Arc<PacketCodecRegistry>,
    ) -> Self {
        Self {
            registry,
            context: Mutex::new(SessionContext::new(config, account, device)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionContext> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn uin(&self) -> Uin {
        self.lock().account.uin
    }

    pub fn account(&self) -> Account {
        self.lock().account.clone()
    }

    pub fn device(&self) -> DeviceInfo {
        self.lock().device.clone()
    }

    pub fn protocol(&self) -> ProtocolInfo {
        self.lock().protocol
    }

    pub fn registry(&self) -> &Arc<PacketCodecRegistry> {
        &self.registry
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.lock().heartbeat.clone()
    }

    /// Build a login request with this session's identity
    pub fn login_request<F>(&self, build: F) -> Result<OutgoingRequest>
    where
        F: FnOnce(&LoginContext<'_>) -> Result<OutgoingRequest>,
    {
        let ctx = self.lock();
        build(&LoginContext {
            uin: ctx.account.uin,
            protocol: ctx.protocol,
            device: &ctx.device,
        })
    }

    // ------------------------------------------------------------------
    // Auth state and key material
    // ------------------------------------------------------------------

    pub fn auth_state(&self) -> AuthState {
        self.lock().auth
    }

    pub fn apply_auth(&self, event: AuthEvent) -> Result<AuthState> {
        let mut ctx = self.lock();
        let next = ctx.auth.transition(event)?;
        debug!(uin = ctx.account.uin, from = %ctx.auth, to = %next, "Auth state changed");
        ctx.auth = next;
        Ok(next)
    }

    /// Mark the session unusable; waiters are failed
    pub fn invalidate(&self, cause: SharedError) {
        {
            let mut ctx = self.lock();
            ctx.auth = AuthState::Invalidated;
        }
        self.fail_all(cause);
    }

    /// Install secrets saved by a previous session (fast login)
    pub fn restore_secrets(&self, secrets: &AccountSecrets) {
        let mut ctx = self.lock();
        ctx.signatures.tgt = secrets.tgt.clone();
        ctx.signatures.d2 = secrets.d2.clone();
        ctx.signatures.a1 = secrets.a1.clone();
        ctx.signatures.no_pic_sig = secrets.no_pic_sig.clone();
        ctx.signatures.wt_session_ticket = secrets.wt_session_ticket.clone();
        ctx.signatures.wt_session_ticket_key = Some(secrets.wt_session_ticket_key);
    }

    /// Open TLV `0x119` of a successful login
    pub fn open_login_success(&self, sealed: &[u8]) -> Result<LoginSuccess> {
        let key = self.lock().random_key;
        LoginSuccess::open(sealed, &key)
    }

    /// Install keys from a login or key refresh; the replaced d2 key stays
    /// acceptable for the rotation grace window
    pub fn install_login(&self, success: &LoginSuccess) -> Result<AuthState> {
        let mut ctx = self.lock();
        if let Some(old) = ctx.signatures.d2_key {
            if old != success.d2_key {
                ctx.previous_d2_key = Some((old, Instant::now()));
            }
        }
        ctx.signatures = Signatures {
            tgt: success.tgt.clone(),
            d2: success.d2.clone(),
            d2_key: Some(success.d2_key),
            wt_session_ticket: success.wt_session_ticket.clone(),
            wt_session_ticket_key: Some(success.wt_session_ticket_key),
            a1: if success.a1.is_empty() {
                ctx.signatures.a1.clone()
            } else {
                success.a1.clone()
            },
            no_pic_sig: if success.no_pic_sig.is_empty() {
                ctx.signatures.no_pic_sig.clone()
            } else {
                success.no_pic_sig.clone()
            },
        };
        let next = ctx.auth.transition(AuthEvent::Success)?;
        ctx.auth = next;
        Ok(next)
    }

    /// Secrets to persist for the next session
    pub fn secrets(&self) -> Option<AccountSecrets> {
        let ctx = self.lock();
        let d2_key = ctx.signatures.d2_key?;
        Some(AccountSecrets {
            uin: ctx.account.uin,
            a1: ctx.signatures.a1.clone(),
            no_pic_sig: ctx.signatures.no_pic_sig.clone(),
            tgt: ctx.signatures.tgt.clone(),
            d2: ctx.signatures.d2.clone(),
            d2_key,
            wt_session_ticket: ctx.signatures.wt_session_ticket.clone(),
            wt_session_ticket_key: ctx.signatures.wt_session_ticket_key.unwrap_or_default(),
            guid: ctx.device.guid,
        })
    }

    pub fn servers(&self) -> Vec<ServerAddress> {
        self.lock().servers.clone()
    }

    pub fn update_servers(&self, servers: Vec<ServerAddress>) {
        if !servers.is_empty() {
            self.lock().servers = servers;
        }
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Encode a request through the registry and wrap it
    pub fn prepare(&self, request: &OutgoingRequest) -> Result<WrappedRequest> {
        let frame = self.registry.encode(request)?;
        self.wrap(frame)
    }

    /// Bind a sequence, seal the body and add the outer frame
    pub fn wrap(&self, frame: EncodedFrame) -> Result<WrappedRequest> {
        let mut ctx = self.lock();
        if ctx.auth == AuthState::Invalidated {
            return Err(SessionError::Invalidated.into());
        }

        let key = ctx.key_for(frame.encryption)?;
        let sequence = ctx.sequence.next();
        let command = frame.header.command;

        let body = if frame.oicq {
            EnvelopeRequest::seal(
                ctx.account.uin as u32,
                ctx.random_key,
                *ctx.ecdh.public_key(),
                &ctx.share_key,
                &frame.body,
            )
            .encode()
        } else {
            frame.body
        };

        let sso = RequestSso {
            sequence,
            app_id: ctx.protocol.app_id,
            sub_app_id: ctx.protocol.sub_app_id,
            tgt: ctx.signatures.tgt.clone(),
            command: command.clone(),
            session_id: ctx.session_id,
            imei: ctx.device.imei.clone(),
            ksid: ctx.ksid.clone(),
            body,
        }
        .encode();

        let payload = match key {
            Some(key) => tea::encrypt(&sso, &key),
            None => sso,
        };

        let ticket = match (frame.header.kind, frame.encryption) {
            (FrameKind::Login, Encryption::D2Key) => ctx.signatures.d2.clone(),
            _ => Vec::new(),
        };

        let bytes = RequestFrame {
            kind: frame.header.kind,
            encryption: frame.encryption,
            sequence,
            ticket,
            uin: ctx.account.uin.to_string(),
            payload,
        }
        .encode();

        let reply = if frame.expects_response {
            let (tx, rx) = oneshot::channel();
            ctx.outstanding.insert(
                sequence,
                Outstanding {
                    command: command.clone(),
                    reply: tx,
                },
            );
            Some(rx)
        } else {
            None
        };

        trace!(%sequence, command = %command, len = bytes.len(), "Wrapped request");
        Ok(WrappedRequest {
            sequence,
            command,
            bytes,
            reply,
        })
    }

    /// Forget a request that timed out or was abandoned
    pub fn cancel(&self, sequence: SequenceId) {
        self.lock().outstanding.remove(&sequence);
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Fail every waiting request with `error`
    pub fn fail_all(&self, error: SharedError) {
        let drained: Vec<Outstanding> = {
            let mut ctx = self.lock();
            ctx.outstanding.drain().map(|(_, o)| o).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), error = %error, "Failing outstanding requests");
        }
        for outstanding in drained {
            let _ = outstanding.reply.send(Err(Arc::clone(&error)));
        }
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    /// Strip the outer frame, decrypt, parse the SSO frame and decode the body.
    ///
    /// A d2 decrypt failure is retried with the previous d2 key; the error
    /// reports whether a rotation grace window was open.
    pub fn unwrap(&self, bytes: &[u8]) -> Result<Packet> {
        let frame = ResponseFrame::decode(bytes)?;
        let sso_bytes = self.open_outer(&frame)?;
        let sso = ResponseSso::decode(&sso_bytes)?;
        sso.check_return_code()?;

        let body = match frame.kind {
            FrameKind::Login => self.open_envelope(&sso.body)?,
            FrameKind::Uni => sso.body,
        };

        Ok(self.registry.decode(&sso.command, sso.sequence, body))
    }

    fn open_outer(&self, frame: &ResponseFrame) -> Result<Vec<u8>> {
        let ctx = self.lock();
        match frame.encryption {
            Encryption::None => Ok(frame.payload.clone()),
            Encryption::EmptyKey => tea::decrypt(&frame.payload, &EMPTY_KEY),
            Encryption::D2Key => {
                let key = ctx.key_for(Encryption::D2Key)?;
                let attempt = key
                    .map(|key| tea::decrypt(&frame.payload, &key))
                    .unwrap_or_else(|| Err(ImbotError::invalid_packet("no d2 key")));
                if let Ok(plain) = attempt {
                    return Ok(plain);
                }

                let within_grace = ctx.within_grace();
                if within_grace {
                    if let Some((previous, _)) = ctx.previous_d2_key {
                        if let Ok(plain) = tea::decrypt(&frame.payload, &previous) {
                            debug!("Frame decrypted with previous session key");
                            return Ok(plain);
                        }
                    }
                }
                Err(SessionError::DecryptFailed { within_grace }.into())
            }
        }
    }

    fn open_envelope(&self, body: &[u8]) -> Result<Vec<u8>> {
        let envelope = EnvelopeResponse::decode(body)?;
        let ctx = self.lock();
        match envelope.method {
            envelope_method::SHARE_KEY => tea::decrypt(&envelope.encrypted, &ctx.share_key)
                .or_else(|_| tea::decrypt(&envelope.encrypted, &ctx.random_key)),
            envelope_method::SESSION_TICKET_KEY => {
                let key = ctx.signatures.wt_session_ticket_key.ok_or(ImbotError::Session(
                    SessionError::MissingKey {
                        what: "wt session ticket key",
                    },
                ))?;
                tea::decrypt(&envelope.encrypted, &key)
            }
            envelope_method::PEER_KEY => {
                let peer = envelope
                    .peer_public_key
                    .ok_or_else(|| ImbotError::invalid_packet("peer key missing"))?;
                let share = ctx.ecdh.share_key(&peer);
                tea::decrypt(&envelope.encrypted, &share)
            }
            other => Err(ImbotError::invalid_packet(format!(
                "unknown login envelope method {other}"
            ))),
        }
    }

    /// Deliver a reply to its waiter, or pass the packet on.
    ///
    /// A waiter only matches when both the sequence and the command agree.
    pub fn route(&self, packet: Packet) -> Routed {
        let waiter = {
            let mut ctx = self.lock();
            let matches = ctx
                .outstanding
                .get(&packet.sequence)
                .is_some_and(|o| o.command == packet.command);
            if matches {
                ctx.outstanding.remove(&packet.sequence)
            } else {
                None
            }
        };

        match waiter {
            Some(outstanding) => {
                if outstanding.reply.send(Ok(packet)).is_err() {
                    trace!("Reply arrived after its waiter gave up");
                }
                Routed::Delivered
            }
            None if packet.kind == PacketKind::Response => {
                warn!(
                    command = %packet.command,
                    sequence = %packet.sequence,
                    "Discarding reply with no matching request"
                );
                Routed::Discarded(packet)
            }
            None => Routed::Push(packet),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Credentials;
    use crate::protocol::commands::{self, stat_svc};
    use crate::protocol::packet::PacketPayload;
    use crate::protocol::wire::compression;

    fn create_test_processor() -> SsoProcessor {
        let config = BotConfiguration::testing();
        SsoProcessor::new(
            &config,
            Account::new(10001, Credentials::PasswordMd5([1; 16])),
            DeviceInfo::random(),
            Arc::new(PacketCodecRegistry::with_default_commands()),
        )
    }

    fn create_test_success(d2_key: [u8; 16]) -> LoginSuccess {
        LoginSuccess {
            tgt: vec![1; 4],
            d2: vec![2; 4],
            d2_key,
            wt_session_ticket: vec![],
            wt_session_ticket_key: [0; 16],
            a1: vec![3; 4],
            no_pic_sig: vec![4; 4],
            nick: String::new(),
        }
    }

    fn authenticate(processor: &SsoProcessor, d2_key: [u8; 16]) {
        processor.apply_auth(AuthEvent::Begin).unwrap();
        processor.install_login(&create_test_success(d2_key)).unwrap();
    }

    fn server_reply(sequence: SequenceId, command: &str, body: Vec<u8>, key: &[u8; 16]) -> Vec<u8> {
        let sso = ResponseSso {
            sequence,
            return_code: 0,
            extra: vec![],
            command: command.into(),
            session_id: vec![],
            body,
        }
        .encode(compression::ZLIB)
        .unwrap();
        ResponseFrame {
            kind: FrameKind::Uni,
            encryption: Encryption::D2Key,
            uin: "10001".into(),
            payload: tea::encrypt(&sso, key),
        }
        .encode()
    }

    #[test]
    fn test_sequence_wraps_into_range() {
        let mut counter = SequenceCounter::new(Some(SEQUENCE_LIMIT - 1));
        let wrapped = counter.next();
        assert!((SEQUENCE_WRAP_LOW..SEQUENCE_LIMIT).contains(&wrapped.value()));

        let mut counter = SequenceCounter::new(Some(1000));
        assert_eq!(counter.next(), SequenceId(1002));
        assert_eq!(counter.next(), SequenceId(1004));
    }

    #[test]
    fn test_auth_transitions() {
        use AuthEvent::*;
        let s = AuthState::Unauthenticated.transition(Begin).unwrap();
        assert_eq!(s, AuthState::Authenticating);
        assert_eq!(s.transition(Challenge).unwrap(), AuthState::Unauthenticated);
        assert_eq!(s.transition(Success).unwrap(), AuthState::Authenticated);
        assert!(AuthState::Unauthenticated.transition(Success).is_err());
        let dead = s.transition(Invalidate).unwrap();
        assert!(dead.transition(Begin).is_err());
    }

    #[test]
    fn test_uni_request_needs_session_key() {
        let processor = create_test_processor();
        let err = processor.prepare(&stat_svc::alive()).unwrap_err();
        assert!(matches!(
            err,
            ImbotError::Session(SessionError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_reply_round_trip() {
        let processor = create_test_processor();
        authenticate(&processor, [5; 16]);

        let mut wrapped = processor.prepare(&stat_svc::alive()).unwrap();
        assert_eq!(processor.outstanding(), 1);

        let parsed = RequestFrame::decode(&wrapped.bytes).unwrap();
        assert_eq!(parsed.sequence, wrapped.sequence);
        let sso = RequestSso::decode(&tea::decrypt(&parsed.payload, &[5; 16]).unwrap()).unwrap();
        assert_eq!(sso.command, commands::HEARTBEAT_ALIVE);

        let body = bincode::serialize(&stat_svc::AliveResponse).unwrap();
        let reply = server_reply(wrapped.sequence, commands::HEARTBEAT_ALIVE, body, &[5; 16]);
        let packet = processor.unwrap(&reply).unwrap();
        assert!(matches!(processor.route(packet), Routed::Delivered));

        let delivered = wrapped.reply.take().unwrap().try_recv().unwrap().unwrap();
        assert!(matches!(delivered.payload, PacketPayload::Alive(_)));
        assert_eq!(processor.outstanding(), 0);
    }

    #[test]
    fn test_stale_sequence_is_discarded() {
        let old = create_test_processor();
        authenticate(&old, [5; 16]);
        let stale = old.prepare(&stat_svc::alive()).unwrap();

        let fresh = create_test_processor();
        authenticate(&fresh, [5; 16]);
        let body = bincode::serialize(&stat_svc::AliveResponse).unwrap();
        let reply = server_reply(stale.sequence, commands::HEARTBEAT_ALIVE, body, &[5; 16]);
        let packet = fresh.unwrap(&reply).unwrap();
        assert!(matches!(fresh.route(packet), Routed::Discarded(_)));
    }

    #[test]
    fn test_command_mismatch_not_delivered() {
        let processor = create_test_processor();
        authenticate(&processor, [5; 16]);
        let wrapped = processor.prepare(&stat_svc::alive()).unwrap();

        let body = bincode::serialize(&stat_svc::SimpleGetResponse { server_time: 1 }).unwrap();
        let reply = server_reply(wrapped.sequence, commands::STAT_SIMPLE_GET, body, &[5; 16]);
        let packet = processor.unwrap(&reply).unwrap();
        assert!(matches!(processor.route(packet), Routed::Discarded(_)));
        assert_eq!(processor.outstanding(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_key_accepted_within_grace() {
        let processor = create_test_processor();
        authenticate(&processor, [5; 16]);
        processor.install_login(&create_test_success([6; 16])).unwrap();

        let body = bincode::serialize(&stat_svc::AliveResponse).unwrap();
        let old_key_frame = server_reply(SequenceId(9), commands::HEARTBEAT_ALIVE, body.clone(), &[5; 16]);
        assert!(processor.unwrap(&old_key_frame).is_ok());

        tokio::time::advance(Duration::from_secs(5)).await;
        let err = processor.unwrap(&old_key_frame).unwrap_err();
        assert!(err.invalidates_session());

        let garbage = server_reply(SequenceId(9), commands::HEARTBEAT_ALIVE, body, &[7; 16]);
        assert!(processor.unwrap(&garbage).unwrap_err().invalidates_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_inside_grace_is_recoverable() {
        let processor = create_test_processor();
        authenticate(&processor, [5; 16]);
        processor.install_login(&create_test_success([6; 16])).unwrap();

        let body = bincode::serialize(&stat_svc::AliveResponse).unwrap();
        let garbage = server_reply(SequenceId(9), commands::HEARTBEAT_ALIVE, body, &[7; 16]);
        let err = processor.unwrap(&garbage).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!err.invalidates_session());
    }

    #[test]
    fn test_fail_all_wakes_waiters() {
        let processor = create_test_processor();
        authenticate(&processor, [5; 16]);
        let mut wrapped = processor.prepare(&stat_svc::alive()).unwrap();
        processor.invalidate(Arc::new(ImbotError::handler_closed("test")));

        let result = wrapped.reply.take().unwrap().try_recv().unwrap();
        assert!(result.is_err());
        assert_eq!(processor.auth_state(), AuthState::Invalidated);
        assert!(processor.prepare(&stat_svc::alive()).is_err());
    }
}
