//! `ConfigPushSvc.PushReq`: server list updates

use serde::{Deserialize, Serialize};

use crate::config::ServerAddress;
use crate::protocol::packet::OutgoingRequest;
use crate::utils::ip_to_long;

use super::CONFIG_PUSH_RESP;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigPushKind {
    /// SSO server list
    ServerList(Vec<ServerEntry>),
    /// Anything else; acknowledged and ignored
    Other { kind: u32, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPushRequest {
    pub sequence: u64,
    pub kind: ConfigPushKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPushAck {
    pub sequence: u64,
}

impl ConfigPushRequest {
    /// Pushed servers with a parsable IPv4 address; malformed entries are skipped
    pub fn valid_servers(&self) -> Vec<ServerAddress> {
        match &self.kind {
            ConfigPushKind::ServerList(entries) => entries
                .iter()
                .filter(|entry| ip_to_long(&entry.ip) > 0 && entry.port != 0)
                .map(|entry| ServerAddress::new(entry.ip.clone(), entry.port))
                .collect(),
            ConfigPushKind::Other { .. } => Vec::new(),
        }
    }
}

pub fn ack(request: &ConfigPushRequest) -> OutgoingRequest {
    OutgoingRequest::uni(
        CONFIG_PUSH_RESP,
        ConfigPushAck {
            sequence: request.sequence,
        },
    )
    .without_response()
}
