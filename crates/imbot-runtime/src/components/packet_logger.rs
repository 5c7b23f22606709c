//! Packet logging
//!
//! With `packet_debug` on, every sent and received packet is logged at debug.
//! Packets flagged `no_log` are never logged, whatever the switch says.

use imbot_core::protocol::packet::{Packet, PacketFlags};
use imbot_core::types::SequenceId;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct PacketLogger {
    enabled: bool,
}

impl PacketLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn should_log(&self, flags: PacketFlags) -> bool {
        self.enabled && !flags.no_log
    }

    pub fn log_sent(&self, command: &str, sequence: SequenceId, flags: PacketFlags, len: usize) {
        if self.should_log(flags) {
            debug!(command, %sequence, len, "Send packet");
        }
    }

    pub fn log_received(&self, packet: &Packet) {
        if self.should_log(packet.flags) {
            debug!(
                command = %packet.command,
                sequence = %packet.sequence,
                payload = packet.payload.name(),
                len = packet.body.len(),
                "Receive packet"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_log_wins_over_debug_switch() {
        let logger = PacketLogger::new(true);
        assert!(logger.should_log(PacketFlags::NONE));
        assert!(!logger.should_log(PacketFlags::NO_LOG));
        assert!(logger.should_log(PacketFlags::NO_EVENT_LOG));
        assert!(!PacketLogger::new(false).should_log(PacketFlags::NONE));
    }
}
