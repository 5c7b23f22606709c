//! Transport boundary
//!
//! A [`Transport`] moves whole frames; framing on the byte stream is the
//! implementation's business. The in-memory implementation here pairs two
//! channel endpoints and is used by the test harness; the TCP implementation
//! lives in the runtime crate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::ServerAddress;
use crate::errors::{ImbotError, Result, TransportError};
use crate::protocol::wire::MAX_FRAME_SIZE;

// ----------------------------------------------------------------------------
// Traits
// ----------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame
    async fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Next frame, or `None` once the peer closed the connection
    async fn receive(&self) -> Result<Option<Vec<u8>>>;

    /// Close both directions; idempotent
    async fn close(&self) -> Result<()>;

    /// Remote endpoint description for logs
    fn peer(&self) -> String;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>>;
}

// ----------------------------------------------------------------------------
// In-Memory Transport
// ----------------------------------------------------------------------------

/// One end of an in-memory connection
pub struct MemoryTransport {
    peer: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
}

impl MemoryTransport {
    /// Two connected endpoints
    pub fn pair(left: &str, right: &str) -> (MemoryTransport, MemoryTransport) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            Self::endpoint(right, left_tx, left_rx),
            Self::endpoint(left, right_tx, right_rx),
        )
    }

    fn endpoint(
        peer: &str,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            peer: peer.to_string(),
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        let sender = self.sender().ok_or(TransportError::ConnectionClosed)?;
        sender
            .send(frame)
            .map_err(|_| ImbotError::Transport(TransportError::ConnectionClosed))
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            frame = inbound.recv() => Ok(frame),
            _ = closed.changed() => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        let dropped = self
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if dropped.is_some() {
            debug!(peer = %self.peer, "Memory transport closed");
        }
        self.closed.send_replace(true);
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.close();
        }
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// ----------------------------------------------------------------------------
// In-Memory Network
// ----------------------------------------------------------------------------

/// Server side of a connection made through a [`MemoryConnector`]
pub struct Accepted {
    pub address: ServerAddress,
    pub transport: MemoryTransport,
}

/// Receives connections made through the paired [`MemoryConnector`]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<Accepted>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<Accepted> {
        self.incoming.recv().await
    }
}

/// Connects to a [`MemoryListener`]; can be told to refuse connections
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<Accepted>,
    refused: Mutex<HashSet<ServerAddress>>,
    fail_next: AtomicU32,
    attempts: AtomicU32,
}

/// A connector and the listener it dials
pub fn memory_network() -> (Arc<MemoryConnector>, MemoryListener) {
    let (accept, incoming) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        accept,
        refused: Mutex::new(HashSet::new()),
        fail_next: AtomicU32::new(0),
        attempts: AtomicU32::new(0),
    };
    (Arc::new(connector), MemoryListener { incoming })
}

impl MemoryConnector {
    /// Refuse the next `count` connection attempts
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Always refuse connections to `address`
    pub fn refuse(&self, address: ServerAddress) {
        self.refused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address);
    }

    /// Connection attempts so far, refused ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let refused = self
            .refused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(address);
        if scripted_failure || refused {
            return Err(ImbotError::connection_failed(
                address.to_string(),
                "connection refused",
            ));
        }

        let (client, server) = MemoryTransport::pair("client", &address.to_string());
        self.accept
            .send(Accepted {
                address: address.clone(),
                transport: server,
            })
            .map_err(|_| ImbotError::connection_failed(address.to_string(), "no listener"))?;
        Ok(Arc::new(client))
    }
}
