//! TCP transport
//!
//! Outer frames carry their own total length in the first four bytes, so a
//! frame is read as the prefix followed by `length - 4` more bytes and handed
//! up whole.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imbot_core::config::ServerAddress;
use imbot_core::errors::{ImbotError, Result, TransportError};
use imbot_core::protocol::wire::frame_length;
use imbot_core::transport::{Connector, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

const LENGTH_PREFIX_SIZE: usize = 4;

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

pub struct TcpTransport {
    peer: String,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, peer: String) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed.into());
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(TransportError::NetworkIo)?;
        writer.flush().await.map_err(TransportError::NetworkIo)?;
        trace!(peer = %self.peer, len = frame.len(), "Frame written");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut reader = self.reader.lock().await;

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(TransportError::NetworkIo(e).into()),
        }

        let total = frame_length(prefix)?;
        let mut frame = vec![0u8; total];
        frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix);
        reader
            .read_exact(&mut frame[LENGTH_PREFIX_SIZE..])
            .await
            .map_err(TransportError::NetworkIo)?;
        trace!(peer = %self.peer, len = total, "Frame read");
        Ok(Some(frame))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        // The peer may already be gone
        let _ = writer.shutdown().await;
        debug!(peer = %self.peer, "TCP transport closed");
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// Opens plain TCP connections to SSO servers
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &ServerAddress) -> Result<Arc<dyn Transport>> {
        let target = address.to_string();
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| ImbotError::timeout(format!("connect to {target}"), self.connect_timeout))?
        .map_err(|e| ImbotError::connection_failed(target.clone(), e.to_string()))?;

        debug!(peer = %target, "TCP connection established");
        Ok(Arc::new(TcpTransport::new(stream, target)))
    }
}
