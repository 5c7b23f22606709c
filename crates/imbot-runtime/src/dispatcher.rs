//! Event dispatcher
//!
//! Listeners are kept in a vector ordered by priority, then by registration.
//! Every broadcast runs against a snapshot of that vector, so listeners added
//! or removed mid-broadcast only affect later broadcasts. A listener that
//! returns an error or panics is logged and skipped; the remaining listeners
//! still run. Cancelling a cancellable event only marks it: every later
//! listener still runs, and the broadcaster reads the mark afterwards to skip
//! its default action.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use imbot_core::errors::{ImbotError, Result};
use imbot_core::events::{BotEvent, EventKind};
use imbot_core::protocol::packet::PacketFlags;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

// ----------------------------------------------------------------------------
// Listener Types
// ----------------------------------------------------------------------------

/// Delivery order; lower runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Highest,
    High,
    Normal,
    Low,
    Lowest,
    /// Runs after every other tier
    Monitor,
}

/// Whether a listener stays registered after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningStatus {
    Listening,
    Stopped,
}

/// Which events a listener receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Kinds(Vec<EventKind>),
}

impl EventFilter {
    pub fn kind(kind: EventKind) -> Self {
        EventFilter::Kinds(vec![kind])
    }

    pub fn matches(&self, event: &BotEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&event.kind()),
        }
    }
}

/// An event as seen by listeners, shared across one broadcast
#[derive(Debug)]
pub struct EventEnvelope {
    event: BotEvent,
    cancelled: AtomicBool,
}

impl EventEnvelope {
    fn new(event: BotEvent) -> Self {
        Self {
            event,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn event(&self) -> &BotEvent {
        &self.event
    }

    /// Cancel the event; returns false if the event kind cannot be cancelled
    pub fn cancel(&self) -> bool {
        if !self.event.is_cancellable() {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn into_event(self) -> BotEvent {
        self.event
    }
}

type ListenerFn =
    dyn Fn(Arc<EventEnvelope>) -> BoxFuture<'static, anyhow::Result<ListeningStatus>> + Send + Sync;

struct Registration {
    id: u64,
    filter: EventFilter,
    priority: EventPriority,
    callback: Arc<ListenerFn>,
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

struct DispatcherInner {
    listeners: RwLock<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
    in_flight: watch::Sender<usize>,
}

impl DispatcherInner {
    fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }
}

/// Publishes [`BotEvent`]s to registered listeners
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .field("in_flight", &*self.inner.in_flight.borrow())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                in_flight,
            }),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Register a listener
    pub fn subscribe<F, Fut>(
        &self,
        filter: EventFilter,
        priority: EventPriority,
        listener: F,
    ) -> ListenerHandle
    where
        F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListeningStatus>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: Arc<ListenerFn> = Arc::new(move |envelope| listener(envelope).boxed());
        let registration = Arc::new(Registration {
            id,
            filter,
            priority,
            callback,
        });

        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Ids grow monotonically, so inserting after every listener of equal or
        // higher precedence keeps registration order within a tier
        let position = listeners.partition_point(|existing| existing.priority <= priority);
        listeners.insert(position, registration);
        trace!(listener = id, ?priority, "Listener registered");

        ListenerHandle {
            id,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Forward matching events into a channel
    pub fn subscribe_channel(
        &self,
        filter: EventFilter,
    ) -> (ListenerHandle, mpsc::UnboundedReceiver<BotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(filter, EventPriority::Monitor, move |envelope| {
            let delivered = tx.send(envelope.event().clone()).is_ok();
            async move {
                Ok(if delivered {
                    ListeningStatus::Listening
                } else {
                    ListeningStatus::Stopped
                })
            }
        });
        (handle, rx)
    }

    /// Deliver an event on a background task
    pub fn broadcast(&self, event: BotEvent) -> BroadcastHandle {
        self.broadcast_flagged(event, PacketFlags::NONE)
    }

    /// Like [`broadcast`](Self::broadcast), honouring the logging flags of the
    /// packet the event came from
    pub fn broadcast_flagged(&self, event: BotEvent, flags: PacketFlags) -> BroadcastHandle {
        let guard = InFlight::enter(&self.inner);
        let dispatcher = self.clone();
        let join = tokio::spawn(async move {
            let envelope = dispatcher.deliver(event, flags).await;
            drop(guard);
            envelope
        });
        BroadcastHandle { join }
    }

    /// Deliver an event on the current task and return once every listener ran
    pub async fn broadcast_and_wait(&self, event: BotEvent) -> Arc<EventEnvelope> {
        let _guard = InFlight::enter(&self.inner);
        self.deliver(event, PacketFlags::NONE).await
    }

    /// Wait until no broadcast is in flight
    pub async fn join_broadcast(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives in `self`
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    async fn deliver(&self, event: BotEvent, flags: PacketFlags) -> Arc<EventEnvelope> {
        if !flags.no_event_log {
            debug!(event = %event.kind(), "Broadcasting event");
        }
        let envelope = Arc::new(EventEnvelope::new(event));

        for registration in self.inner.snapshot() {
            if !registration.filter.matches(envelope.event()) {
                continue;
            }

            let call = (registration.callback)(Arc::clone(&envelope));
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(ListeningStatus::Listening)) => {}
                Ok(Ok(ListeningStatus::Stopped)) => {
                    self.inner.remove(registration.id);
                    trace!(listener = registration.id, "Listener stopped");
                }
                Ok(Err(e)) => {
                    warn!(
                        listener = registration.id,
                        event = %envelope.event().kind(),
                        error = %e,
                        "Listener failed"
                    );
                }
                Err(panic) => {
                    error!(
                        listener = registration.id,
                        event = %envelope.event().kind(),
                        panic = panic_message(panic.as_ref()),
                        "Listener panicked"
                    );
                }
            }
        }
        envelope
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Counts a broadcast as in flight until dropped
struct InFlight {
    dispatcher: Arc<DispatcherInner>,
}

impl InFlight {
    fn enter(dispatcher: &Arc<DispatcherInner>) -> Self {
        dispatcher.in_flight.send_modify(|count| *count += 1);
        Self {
            dispatcher: Arc::clone(dispatcher),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.dispatcher
            .in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Registration of one listener
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    dispatcher: Weak<DispatcherInner>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister; returns false if the listener was already gone
    pub fn remove(&self) -> bool {
        self.dispatcher
            .upgrade()
            .map(|dispatcher| dispatcher.remove(self.id))
            .unwrap_or(false)
    }

    pub fn is_active(&self) -> bool {
        self.dispatcher
            .upgrade()
            .map(|dispatcher| dispatcher.snapshot().iter().any(|r| r.id == self.id))
            .unwrap_or(false)
    }
}

/// Listeners that are removed together when the scope is dropped
#[derive(Debug, Default)]
pub struct ListenerScope {
    handles: Vec<ListenerHandle>,
}

impl ListenerScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: ListenerHandle) -> &mut Self {
        self.handles.push(handle);
        self
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.remove();
        }
    }
}

/// Completion of a background broadcast
#[derive(Debug)]
pub struct BroadcastHandle {
    join: JoinHandle<Arc<EventEnvelope>>,
}

impl BroadcastHandle {
    /// Wait for every listener to run
    pub async fn join(self) -> Result<Arc<EventEnvelope>> {
        self.join.await.map_err(|e| ImbotError::HandlerClosed {
            reason: format!("broadcast task failed: {e}"),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn create_test_event() -> BotEvent {
        BotEvent::FriendListRefreshed { count: 3 }
    }

    fn recorder(
        dispatcher: &EventDispatcher,
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        priority: EventPriority,
    ) -> ListenerHandle {
        let log = Arc::clone(log);
        dispatcher.subscribe(EventFilter::All, priority, move |_| {
            log.lock().unwrap().push(name);
            async { Ok(ListeningStatus::Listening) }
        })
    }

    #[tokio::test]
    async fn test_priority_then_registration_order() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&dispatcher, &log, "low", EventPriority::Low);
        recorder(&dispatcher, &log, "normal-1", EventPriority::Normal);
        recorder(&dispatcher, &log, "highest", EventPriority::Highest);
        recorder(&dispatcher, &log, "normal-2", EventPriority::Normal);
        recorder(&dispatcher, &log, "monitor", EventPriority::Monitor);

        dispatcher.broadcast_and_wait(create_test_event()).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["highest", "normal-1", "normal-2", "low", "monitor"]
        );
    }

    #[tokio::test]
    async fn test_stopped_listener_is_removed() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.subscribe(EventFilter::All, EventPriority::Normal, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(ListeningStatus::Stopped) }
        });

        dispatcher.broadcast_and_wait(create_test_event()).await;
        dispatcher.broadcast_and_wait(create_test_event()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_selects_kinds() {
        let dispatcher = EventDispatcher::new();
        let (_handle, mut rx) =
            dispatcher.subscribe_channel(EventFilter::kind(EventKind::GroupListRefreshed));
        dispatcher.broadcast_and_wait(create_test_event()).await;
        dispatcher
            .broadcast_and_wait(BotEvent::GroupListRefreshed { count: 1 })
            .await;
        assert!(matches!(
            rx.try_recv(),
            Ok(BotEvent::GroupListRefreshed { count: 1 })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scope_drop_removes_listeners() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut scope = ListenerScope::new();
            scope
                .add(recorder(&dispatcher, &log, "a", EventPriority::Normal))
                .add(recorder(&dispatcher, &log, "b", EventPriority::Normal));
            assert_eq!(dispatcher.listener_count(), 2);
        }
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_join_broadcast_waits_for_background_delivery() {
        let dispatcher = EventDispatcher::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        dispatcher.subscribe(EventFilter::All, EventPriority::Normal, move |_| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(ListeningStatus::Listening)
            }
        });

        dispatcher.broadcast(create_test_event());
        dispatcher.join_broadcast().await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_listeners_do_not_stop_delivery() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe(EventFilter::All, EventPriority::Highest, |envelope| async move {
            if envelope.event().kind() == EventKind::FriendListRefreshed {
                panic!("listener bug");
            }
            Ok(ListeningStatus::Listening)
        });
        dispatcher.subscribe(EventFilter::All, EventPriority::High, |_| async {
            Err(anyhow::anyhow!("listener error"))
        });
        recorder(&dispatcher, &log, "normal", EventPriority::Normal);

        dispatcher.broadcast_and_wait(create_test_event()).await;
        dispatcher.broadcast_and_wait(create_test_event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["normal", "normal"]);
        assert_eq!(dispatcher.listener_count(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_message_still_reaches_later_listeners() {
        use imbot_core::events::GroupMessageEvent;
        use imbot_core::message::{MessageChain, MessageSource, SingleMessage, SourceKind};

        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.subscribe(EventFilter::All, EventPriority::High, |envelope| {
            let cancelled = envelope.cancel();
            async move {
                assert!(cancelled);
                Ok(ListeningStatus::Listening)
            }
        });
        recorder(&dispatcher, &log, "normal", EventPriority::Normal);
        recorder(&dispatcher, &log, "monitor", EventPriority::Monitor);

        let event = BotEvent::GroupMessage(GroupMessageEvent {
            group: 100,
            group_name: "rustaceans".into(),
            sender: 7,
            sender_card: String::new(),
            chain: MessageChain::new(vec![SingleMessage::text("hi")]),
            source: MessageSource {
                kind: SourceKind::Group,
                from: 7,
                target: 100,
                sequence: 1,
                random: 2,
                time: 3,
                preview: "hi".into(),
            },
        });
        let envelope = dispatcher.broadcast_and_wait(event).await;
        assert!(envelope.is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["normal", "monitor"]);
    }

    #[test]
    fn test_non_message_events_cannot_be_cancelled() {
        let envelope = EventEnvelope::new(create_test_event());
        assert!(!envelope.cancel());
        assert!(!envelope.is_cancelled());
    }
}
