//! Reader and writer tasks of a network handler

use std::sync::Arc;

use imbot_core::errors::TransportError;
use imbot_core::events::BotEvent;
use imbot_core::protocol::{CloseReason, Routed};
use imbot_core::transport::Transport;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{lock, NetworkHandler, OutboundFrame};
use crate::components::packet_handler;

impl NetworkHandler {
    pub(super) fn spawn_io(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let Some(outbound) = lock(&self.outbound_rx).take() else {
            warn!(handler = %self.id, "I/O tasks already started");
            return;
        };
        let reader = tokio::spawn(Arc::clone(self).read_loop(Arc::clone(&transport)));
        let writer = tokio::spawn(Arc::clone(self).write_loop(transport, outbound));
        self.track([reader, writer]);
    }

    async fn write_loop(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        mut outbound: mpsc::Receiver<OutboundFrame>,
    ) {
        while let Some(frame) = outbound.recv().await {
            trace!(handler = %self.id, command = %frame.command, sequence = %frame.sequence, "Writing frame");
            if let Err(e) = transport.send(frame.bytes).await {
                warn!(handler = %self.id, error = %e, "Write failed");
                self.close(CloseReason::Transport(Arc::new(e))).await;
                return;
            }
        }
    }

    async fn read_loop(self: Arc<Self>, transport: Arc<dyn Transport>) {
        loop {
            let frame = match transport.receive().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(handler = %self.id, "Connection closed by server");
                    let error = TransportError::ConnectionClosed.into();
                    self.close(CloseReason::Transport(Arc::new(error))).await;
                    return;
                }
                Err(e) => {
                    warn!(handler = %self.id, error = %e, "Read failed");
                    self.close(CloseReason::Transport(Arc::new(e))).await;
                    return;
                }
            };

            if let Some(reason) = self.handle_frame(&frame) {
                self.close(reason).await;
                return;
            }
        }
    }

    /// Decode and route one frame; returns a reason if the handler must close
    fn handle_frame(self: &Arc<Self>, frame: &[u8]) -> Option<CloseReason> {
        let packet = match self.processor.unwrap(frame) {
            Ok(packet) => packet,
            Err(e) if e.invalidates_session() => {
                warn!(handler = %self.id, error = %e, "Session no longer valid");
                return Some(CloseReason::SessionInvalidated(Arc::new(e)));
            }
            Err(e) => {
                warn!(handler = %self.id, error = %e, len = frame.len(), "Dropping undecodable frame");
                return None;
            }
        };

        self.context.logger.log_received(&packet);
        if self.context.events.listener_count() > 0 {
            self.context.events.broadcast_flagged(
                BotEvent::PacketReceived {
                    packet: Arc::new(packet.clone()),
                },
                packet.flags,
            );
        }

        match self.processor.route(packet) {
            Routed::Delivered | Routed::Discarded(_) => {}
            Routed::Push(packet) => {
                let handler = Arc::clone(self);
                tokio::spawn(async move { packet_handler::handle_push(&handler, packet).await });
            }
        }
        None
    }
}
