//! Network Handler
//!
//! One handler owns one connection and one SSO session. It walks
//! `Initialized -> Connecting -> Loading -> Ok -> Closed` and never leaves
//! `Closed`; a lost connection is replaced by a fresh handler created by the
//! selector. Every state change is recorded in an audit trail.

mod io;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use imbot_core::errors::{ImbotError, Result, TransportError};
use imbot_core::events::BotEvent;
use imbot_core::protocol::commands;
use imbot_core::protocol::connection_state::AuditEntry;
use imbot_core::protocol::packet::PacketFlags;
use imbot_core::protocol::{
    CloseReason, HandlerEvent, HandlerState, OutgoingRequest, Packet, SsoProcessor,
};
use imbot_core::transport::Transport;
use imbot_core::types::{SequenceId, Uin};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::components::{contact_updater, heartbeat, key_refresh, login};
use crate::context::BotContext;

/// Maximum number of audit entries kept per handler
const MAX_AUDIT_ENTRIES: usize = 1000;

// ----------------------------------------------------------------------------
// Send Options
// ----------------------------------------------------------------------------

/// How a request waits for its reply
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Reply timeout of a single attempt
    pub timeout: Duration,
    /// Wait for the handler to become ready instead of failing with `NotReady`
    pub wait_ready: bool,
    /// Total attempts; later attempts re-send the same sequence
    pub attempts: u32,
}

impl SendOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            wait_ready: true,
            attempts: 1,
        }
    }

    pub fn fail_fast(mut self) -> Self {
        self.wait_ready = false;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Which handler states admit a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Login commands while loading, everything once ready
    Application,
    /// Session upkeep (register, contact lists) while loading or ready
    Session,
}

struct OutboundFrame {
    command: String,
    sequence: SequenceId,
    bytes: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Network Handler
// ----------------------------------------------------------------------------

pub struct NetworkHandler {
    id: Uuid,
    context: Arc<BotContext>,
    processor: Arc<SsoProcessor>,
    state: watch::Sender<HandlerState>,
    audit: Mutex<Vec<AuditEntry>>,
    outbound: mpsc::Sender<OutboundFrame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundFrame>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NetworkHandler {
    pub fn new(context: Arc<BotContext>) -> Arc<Self> {
        let processor = Arc::new(SsoProcessor::new(
            &context.config,
            context.account.clone(),
            context.device.clone(),
            Arc::clone(&context.registry),
        ));
        processor.update_servers(context.servers());
        let (outbound, outbound_rx) = mpsc::channel(context.config.outbound_queue_size.max(1));
        let (state, _) = watch::channel(HandlerState::Initialized);
        Arc::new(Self {
            id: Uuid::new_v4(),
            context,
            processor,
            state,
            audit: Mutex::new(Vec::new()),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            transport: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uin(&self) -> Uin {
        self.context.uin()
    }

    pub fn context(&self) -> &Arc<BotContext> {
        &self.context
    }

    pub fn processor(&self) -> &Arc<SsoProcessor> {
        &self.processor
    }

    pub fn state(&self) -> HandlerState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HandlerState> {
        self.state.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_ok()
    }

    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        lock(&self.audit).clone()
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Apply a lifecycle event; returns the state that was replaced
    fn apply(&self, event: HandlerEvent) -> Result<HandlerState> {
        let mut outcome = None;
        self.state.send_if_modified(|state| {
            match state.clone().transition(event) {
                Ok(transition) => {
                    let previous = std::mem::replace(state, transition.new_state);
                    outcome = Some(Ok((previous, transition.audit_entry)));
                    true
                }
                Err(e) => {
                    outcome = Some(Err(e));
                    false
                }
            }
        });

        match outcome {
            Some(Ok((previous, entry))) => {
                debug!(
                    handler = %self.id,
                    from = %entry.from_state,
                    to = %entry.to_state,
                    "Handler state changed"
                );
                let mut audit = lock(&self.audit);
                audit.push(entry);
                if audit.len() > MAX_AUDIT_ENTRIES {
                    audit.remove(0);
                }
                Ok(previous)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(ImbotError::handler_closed("state channel unavailable")),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect, log in and initialise the session.
    ///
    /// On failure the handler is closed and the error describes why; the
    /// close reason tells the caller whether a replacement may be tried.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        self.apply(HandlerEvent::StartConnect)?;

        let transport = match self.connect().await {
            Ok(transport) => transport,
            Err(reason) => {
                let failure = reason.failure();
                self.close(reason).await;
                return Err(failure);
            }
        };
        *lock(&self.transport) = Some(Arc::clone(&transport));
        self.apply(HandlerEvent::TransportConnected)?;
        self.spawn_io(transport);

        if let Err(e) = self.load().await {
            if let Some(reason) = self.state().close_reason() {
                // Closed underneath the login (transport loss, force offline)
                return Err(reason.failure());
            }
            let reason = CloseReason::LoginFailed(Arc::new(e));
            let failure = reason.failure();
            self.close(reason).await;
            return Err(failure);
        }

        self.apply(HandlerEvent::LoginCompleted)?;
        let mut tasks = heartbeat::spawn(self);
        tasks.extend(key_refresh::spawn(self));
        self.track(tasks);

        info!(handler = %self.id, uin = self.uin(), "Bot online");
        self.context
            .events
            .broadcast(BotEvent::BotOnline { uin: self.uin() });
        Ok(())
    }

    async fn connect(&self) -> core::result::Result<Arc<dyn Transport>, CloseReason> {
        let timeout = self.context.config.timeouts.connect;
        let mut last = None;
        for address in self.processor.servers() {
            match tokio::time::timeout(timeout, self.context.connector.connect(&address)).await {
                Ok(Ok(transport)) => {
                    info!(handler = %self.id, peer = %address, "Connected");
                    return Ok(transport);
                }
                Ok(Err(e)) => {
                    warn!(handler = %self.id, peer = %address, error = %e, "Connection failed");
                    last = Some(CloseReason::Transport(Arc::new(e)));
                }
                Err(_) => {
                    warn!(handler = %self.id, peer = %address, "Connection timed out");
                    last = Some(CloseReason::ConnectTimeout);
                }
            }
        }
        Err(last.unwrap_or(CloseReason::ConnectTimeout))
    }

    /// Everything between a connected transport and `Ok`
    async fn load(self: &Arc<Self>) -> Result<()> {
        login::login(self).await?;
        heartbeat::register_online(self).await?;

        if self.context.config.load_contacts_on_login {
            if let Err(e) = contact_updater::refresh_friends(self).await {
                warn!(handler = %self.id, error = %e, "Friend list not loaded");
            }
            if let Err(e) = contact_updater::refresh_groups(self).await {
                warn!(handler = %self.id, error = %e, "Group list not loaded");
            }
        }
        Ok(())
    }

    /// Close the handler; returns false if it was already closed
    pub async fn close(&self, reason: CloseReason) -> bool {
        let previous = match self.apply(HandlerEvent::Close(reason.clone())) {
            Ok(previous) => previous,
            Err(_) => return false,
        };
        let reconnect = self.context.reconnect_allowed(&reason);
        info!(handler = %self.id, reason = %reason, reconnect, "Handler closed");

        let error = Arc::new(reason.to_error());
        match reason {
            CloseReason::SessionInvalidated(_) | CloseReason::ForceOffline { .. } => {
                self.processor.invalidate(error);
                self.context.secrets.clear(self.uin());
            }
            _ => self.processor.fail_all(error),
        }

        let transport = lock(&self.transport).take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!(handler = %self.id, error = %e, "Transport close failed");
            }
        }

        if previous.is_ok() {
            let flags = match reason {
                CloseReason::ForceOffline { .. } => PacketFlags::NO_EVENT_LOG,
                _ => PacketFlags::NONE,
            };
            self.context.events.broadcast_flagged(
                BotEvent::BotOffline {
                    uin: self.uin(),
                    reason,
                    reconnect,
                },
                flags,
            );
        }

        // Last: this may be running on one of these tasks
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        true
    }

    /// Wait until the handler is ready, or report why it never will be
    pub async fn await_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| state.is_ok() || state.is_closed()),
        )
        .await;
        let state = match waited {
            Err(_) => return Err(ImbotError::timeout("await handler ready", timeout)),
            Ok(Err(_)) => return Err(ImbotError::handler_closed("state channel closed")),
            Ok(Ok(state)) => state.clone(),
        };
        match state.close_reason() {
            Some(reason) => Err(reason.to_error()),
            None => Ok(()),
        }
    }

    /// Resolves with the close reason once the handler is closed
    pub async fn wait_closed(&self) -> CloseReason {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().close_reason() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return CloseReason::UserRequested;
            }
        }
    }

    pub(crate) fn track(&self, tasks: impl IntoIterator<Item = JoinHandle<()>>) {
        let mut guard = lock(&self.tasks);
        if self.state.borrow().is_closed() {
            for task in tasks {
                task.abort();
            }
            return;
        }
        guard.extend(tasks);
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Send a request and wait for the response with the same sequence
    pub async fn send_and_expect(
        &self,
        request: OutgoingRequest,
        options: SendOptions,
    ) -> Result<Packet> {
        self.send_admitted(request, options, Admission::Application)
            .await
    }

    /// Session upkeep traffic that may flow before the handler is ready
    pub(crate) async fn send_for_session(
        &self,
        request: OutgoingRequest,
        options: SendOptions,
    ) -> Result<Packet> {
        self.send_admitted(request, options, Admission::Session)
            .await
    }

    /// Queue a request that has no response
    pub async fn send_only(&self, request: OutgoingRequest) -> Result<()> {
        let request = request.without_response();
        self.admit(&request, SendOptions::default().fail_fast(), Admission::Session)
            .await?;
        let wrapped = self.processor.prepare(&request)?;
        self.context.logger.log_sent(
            &wrapped.command,
            wrapped.sequence,
            request.flags,
            wrapped.bytes.len(),
        );
        self.enqueue(OutboundFrame {
            command: wrapped.command,
            sequence: wrapped.sequence,
            bytes: wrapped.bytes,
        })
        .await
    }

    async fn admit(
        &self,
        request: &OutgoingRequest,
        options: SendOptions,
        admission: Admission,
    ) -> Result<()> {
        let state = self.state();
        let login_traffic =
            admission == Admission::Session || commands::is_login_command(&request.command);
        if state.accepts(login_traffic) {
            return Ok(());
        }
        if let Some(reason) = state.close_reason() {
            return Err(reason.to_error());
        }
        if options.wait_ready && admission == Admission::Application {
            return self.await_ready(self.context.config.timeouts.ready).await;
        }
        Err(ImbotError::NotReady {
            state: state.state_name().to_string(),
        })
    }

    async fn send_admitted(
        &self,
        request: OutgoingRequest,
        options: SendOptions,
        admission: Admission,
    ) -> Result<Packet> {
        self.admit(&request, options, admission).await?;

        let wrapped = self.processor.prepare(&request)?;
        let Some(mut reply) = wrapped.reply else {
            return Err(ImbotError::invalid_packet(format!(
                "{} does not expect a response",
                wrapped.command
            )));
        };
        let sequence = wrapped.sequence;
        self.context
            .logger
            .log_sent(&wrapped.command, sequence, request.flags, wrapped.bytes.len());

        for attempt in 1..=options.attempts.max(1) {
            let frame = OutboundFrame {
                command: wrapped.command.clone(),
                sequence,
                bytes: wrapped.bytes.clone(),
            };
            if let Err(e) = self.enqueue(frame).await {
                self.processor.cancel(sequence);
                return Err(e);
            }
            match tokio::time::timeout(options.timeout, &mut reply).await {
                Ok(Ok(Ok(packet))) => return Ok(packet),
                Ok(Ok(Err(shared))) => return Err(ImbotError::Shared(shared)),
                Ok(Err(_)) => return Err(ImbotError::handler_closed("reply dropped")),
                Err(_) => {
                    debug!(
                        handler = %self.id,
                        command = %wrapped.command,
                        %sequence,
                        attempt,
                        "No reply in time"
                    );
                }
            }
        }

        self.processor.cancel(sequence);
        Err(ImbotError::timeout(wrapped.command, options.timeout))
    }

    async fn enqueue(&self, frame: OutboundFrame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ImbotError::Transport(TransportError::OutboundClosed))
    }
}

impl Drop for NetworkHandler {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for NetworkHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandler")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}
