//! Network Handler Selector
//!
//! Holds the bot's current handler and replaces it when it dies. Callers that
//! need a working connection ask for [`NetworkHandlerSelector::resumed_handler`];
//! concurrent callers share one resolution attempt and receive its outcome,
//! whether that is a handler or a failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use imbot_core::errors::{ImbotError, Result, SharedError};
use imbot_core::events::BotEvent;
use imbot_core::protocol::{CloseReason, HandlerState};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::BotContext;
use crate::handler::NetworkHandler;

type Outcome = std::result::Result<Arc<NetworkHandler>, SharedError>;

pub struct NetworkHandlerSelector {
    context: Arc<BotContext>,
    current: Mutex<Option<Arc<NetworkHandler>>>,
    /// Serializes resolution attempts
    resolving: tokio::sync::Mutex<()>,
    /// Number of finished resolution attempts
    generation: AtomicU64,
    /// Outcome of the latest finished attempt
    last_outcome: Mutex<Option<Outcome>>,
    closed: watch::Sender<bool>,
    /// Some handler has reached `Ok` before
    was_online: AtomicBool,
}

impl NetworkHandlerSelector {
    pub fn new(context: Arc<BotContext>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            context,
            current: Mutex::new(None),
            resolving: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            closed,
            was_online: AtomicBool::new(false),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<NetworkHandler>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// The current handler, if one exists
    pub fn current(&self) -> Option<Arc<NetworkHandler>> {
        self.slot().clone()
    }

    /// The current handler, created on first use
    pub fn current_handler(&self) -> Result<Arc<NetworkHandler>> {
        if self.is_closed() {
            return Err(ImbotError::SelectorClosed);
        }
        let mut slot = self.slot();
        let handler = slot.get_or_insert_with(|| {
            let handler = NetworkHandler::new(Arc::clone(&self.context));
            debug!(handler = %handler.id(), "Created network handler");
            handler
        });
        Ok(Arc::clone(handler))
    }

    /// Forget the current handler; the next request creates a new one.
    ///
    /// The forgotten handler is not closed.
    pub fn invalidate_current(&self) -> Option<Arc<NetworkHandler>> {
        self.slot().take()
    }

    fn invalidate_if_current(&self, handler: &Arc<NetworkHandler>) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| Arc::ptr_eq(h, handler)) {
            *slot = None;
        }
    }

    /// A handler in `Ok` state, reconnecting with backoff if necessary
    pub async fn resumed_handler(&self) -> Result<Arc<NetworkHandler>> {
        if self.is_closed() {
            return Err(ImbotError::SelectorClosed);
        }
        if let Some(handler) = self.current().filter(|h| h.is_online()) {
            return Ok(handler);
        }

        let mut closed = self.closed.subscribe();
        let closing = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };
        tokio::select! {
            result = self.resolve() => result,
            _ = closing => Err(ImbotError::SelectorClosed),
        }
    }

    async fn resolve(&self) -> Result<Arc<NetworkHandler>> {
        let started = self.generation.load(Ordering::SeqCst);
        let _guard = self.resolving.lock().await;
        // An attempt finished while we queued behind it: share its outcome
        if self.generation.load(Ordering::SeqCst) != started {
            match self.shared_outcome() {
                Some(Ok(handler)) if handler.is_online() => return Ok(handler),
                Some(Err(e)) => return Err(surface(&e)),
                _ => {}
            }
        }
        if let Some(handler) = self.current().filter(|h| h.is_online()) {
            return Ok(handler);
        }

        let outcome: Outcome = self.attempt().await.map_err(Arc::new);
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        outcome.map_err(|e| surface(&e))
    }

    fn shared_outcome(&self) -> Option<Outcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// One resolution attempt: retire a dead handler, then connect with backoff
    async fn attempt(&self) -> Result<Arc<NetworkHandler>> {
        // Retire a dead handler and remember why it died
        let mut previous: Option<CloseReason> = None;
        if let Some(handler) = self.current() {
            if let Some(reason) = handler.state().close_reason().cloned() {
                self.invalidate_if_current(&handler);
                if !self.context.reconnect_allowed(&reason) {
                    return Err(self.terminate(&reason));
                }
                previous = Some(reason);
            }
        }

        let policy = self.context.config.reconnect.clone();
        let max_attempts = policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let handler = self.current_handler()?;
            let outcome = match handler.state() {
                HandlerState::Ok => Ok(()),
                HandlerState::Initialized => handler.resume().await,
                HandlerState::Closed(reason) => Err(reason.failure()),
                HandlerState::Connecting | HandlerState::Loading => {
                    handler.await_ready(self.context.config.timeouts.ready).await
                }
            };

            match outcome {
                Ok(()) => {
                    self.announce(&previous);
                    return Ok(handler);
                }
                Err(e) => {
                    let reason = match handler.state().close_reason() {
                        Some(reason) => reason.clone(),
                        None => {
                            let reason = CloseReason::LoginFailed(Arc::new(e));
                            handler.close(reason.clone()).await;
                            reason
                        }
                    };
                    self.invalidate_if_current(&handler);
                    if !self.context.reconnect_allowed(&reason) {
                        return Err(self.terminate(&reason));
                    }

                    warn!(attempt, max_attempts, reason = %reason, "Connection attempt failed");
                    previous = Some(reason);
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }

        warn!(attempts = max_attempts, "Giving up on reconnection");
        Err(ImbotError::ReconnectExhausted {
            attempts: max_attempts,
        })
    }

    fn announce(&self, previous: &Option<CloseReason>) {
        let uin = self.context.uin();
        if self.was_online.swap(true, Ordering::SeqCst) {
            info!(uin, "Relogin completed");
            self.context.events.broadcast(BotEvent::BotRelogin {
                uin,
                cause: previous.as_ref().and_then(|r| r.cause().cloned()),
            });
        }
    }

    /// Unrecoverable closure: no handler will be created again
    fn terminate(&self, reason: &CloseReason) -> ImbotError {
        warn!(reason = %reason, "Selector stopped after unrecoverable closure");
        self.closed.send_replace(true);
        reason.failure()
    }

    /// Close the selector and its current handler; terminal
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let handler = self.slot().take();
        if let Some(handler) = handler {
            handler.close(CloseReason::UserRequested).await;
        }
        info!(uin = self.context.uin(), "Selector closed");
    }
}

/// Rebuild a shared failure for one waiter, keeping plain variants matchable
fn surface(error: &SharedError) -> ImbotError {
    match error.as_ref() {
        ImbotError::ReconnectExhausted { attempts } => ImbotError::ReconnectExhausted {
            attempts: *attempts,
        },
        ImbotError::SelectorClosed => ImbotError::SelectorClosed,
        ImbotError::ForceOffline { title, message } => ImbotError::ForceOffline {
            title: title.clone(),
            message: message.clone(),
        },
        ImbotError::Shared(inner) => ImbotError::Shared(Arc::clone(inner)),
        _ => ImbotError::Shared(Arc::clone(error)),
    }
}
