//! Server side of the frame layers
//!
//! Mirrors what the session processor does on the client: login frames are
//! sealed with the empty key and carry the ECDH envelope, uni frames are
//! sealed with the d2 key handed out at login.

use imbot_core::crypto::{tea, EcdhKeyPair, EMPTY_KEY};
use imbot_core::errors::{ImbotError, Result};
use imbot_core::protocol::packet::{Encryption, FrameKind};
use imbot_core::protocol::wire::{
    compression, envelope_method, EnvelopeRequest, EnvelopeResponse, RequestFrame, RequestSso,
    ResponseFrame, ResponseSso,
};
use imbot_core::types::{SequenceId, Uin};

/// A client request with every layer removed
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub kind: FrameKind,
    pub sequence: SequenceId,
    pub command: String,
    pub uin: Uin,
    pub body: Vec<u8>,
    /// Present on login frames
    pub envelope: Option<EnvelopeRequest>,
}

/// Session keys the server accepts on uni frames
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionKeys {
    pub current: Option<[u8; 16]>,
    /// Key replaced by the last refresh
    pub previous: Option<[u8; 16]>,
}

impl SessionKeys {
    fn open(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let current = self
            .current
            .ok_or_else(|| ImbotError::invalid_packet("uni frame before login"))?;
        tea::decrypt(payload, &current).or_else(|e| match self.previous {
            Some(previous) => tea::decrypt(payload, &previous),
            None => Err(e),
        })
    }
}

pub fn open_request(bytes: &[u8], ecdh: &EcdhKeyPair, keys: &SessionKeys) -> Result<IncomingRequest> {
    let frame = RequestFrame::decode(bytes)?;
    let sso_bytes = match frame.encryption {
        Encryption::None => frame.payload.clone(),
        Encryption::EmptyKey => tea::decrypt(&frame.payload, &EMPTY_KEY)?,
        Encryption::D2Key => keys.open(&frame.payload)?,
    };
    let sso = RequestSso::decode(&sso_bytes)?;
    let uin = frame
        .uin
        .parse()
        .map_err(|_| ImbotError::invalid_packet(format!("uin {:?}", frame.uin)))?;

    let (body, envelope) = match frame.kind {
        FrameKind::Login => {
            let envelope = EnvelopeRequest::decode(&sso.body)?;
            let body = envelope.open(&ecdh.share_key(&envelope.public_key))?;
            (body, Some(envelope))
        }
        FrameKind::Uni => (sso.body, None),
    };

    Ok(IncomingRequest {
        kind: frame.kind,
        sequence: sso.sequence,
        command: sso.command,
        uin,
        body,
        envelope,
    })
}

/// Reply to a login request, sealed for the envelope it arrived in
pub fn login_reply(request: &IncomingRequest, ecdh: &EcdhKeyPair, body: &[u8]) -> Result<Vec<u8>> {
    let envelope = request
        .envelope
        .as_ref()
        .ok_or_else(|| ImbotError::invalid_packet("login reply without envelope"))?;
    let share_key = ecdh.share_key(&envelope.public_key);
    let sealed = EnvelopeResponse::seal(
        envelope.uin,
        envelope_method::SHARE_KEY,
        None,
        &share_key,
        body,
    )
    .encode();

    let sso = ResponseSso {
        sequence: request.sequence,
        return_code: 0,
        extra: Vec::new(),
        command: request.command.clone(),
        session_id: Vec::new(),
        body: sealed,
    }
    .encode(compression::RAW)?;

    Ok(ResponseFrame {
        kind: FrameKind::Login,
        encryption: Encryption::EmptyKey,
        uin: request.uin.to_string(),
        payload: tea::encrypt(&sso, &EMPTY_KEY),
    }
    .encode())
}

/// Uni frame sealed with `key`; used for replies and pushes alike
pub fn uni_frame(
    sequence: SequenceId,
    command: &str,
    uin: Uin,
    return_code: i32,
    body: Vec<u8>,
    key: &[u8; 16],
) -> Result<Vec<u8>> {
    let sso = ResponseSso {
        sequence,
        return_code,
        extra: Vec::new(),
        command: command.into(),
        session_id: Vec::new(),
        body,
    }
    .encode(compression::ZLIB)?;

    Ok(ResponseFrame {
        kind: FrameKind::Uni,
        encryption: Encryption::D2Key,
        uin: uin.to_string(),
        payload: tea::encrypt(&sso, key),
    }
    .encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imbot_core::protocol::commands::stat_svc;
    use imbot_core::protocol::{AuthEvent, PacketCodecRegistry, PacketPayload, Routed, SsoProcessor};
    use imbot_core::{Account, BotConfiguration, Credentials, DeviceInfo};
    use std::sync::Arc;

    fn create_test_processor(server: &EcdhKeyPair) -> SsoProcessor {
        let mut config = BotConfiguration::testing();
        config.server_public_key = *server.public_key();
        SsoProcessor::new(
            &config,
            Account::new(10_001, Credentials::SessionOnly),
            DeviceInfo::random(),
            Arc::new(PacketCodecRegistry::with_default_commands()),
        )
    }

    #[test]
    fn test_uni_request_opens_with_session_key() {
        let server = EcdhKeyPair::generate();
        let processor = create_test_processor(&server);
        let keys = SessionKeys {
            current: Some([3; 16]),
            previous: None,
        };
        processor.apply_auth(AuthEvent::Begin).unwrap();
        let success = imbot_core::protocol::commands::login::LoginSuccess {
            tgt: vec![1],
            d2: vec![2],
            d2_key: [3; 16],
            wt_session_ticket: vec![],
            wt_session_ticket_key: [4; 16],
            a1: vec![5],
            no_pic_sig: vec![6],
            nick: "imbot".into(),
        };
        processor.install_login(&success).unwrap();

        let mut wrapped = processor.prepare(&stat_svc::simple_get()).unwrap();
        let request = open_request(&wrapped.bytes, &server, &keys).unwrap();
        assert_eq!(request.command, "StatSvc.SimpleGet");
        assert_eq!(request.uin, 10_001);
        assert_eq!(request.sequence, wrapped.sequence);

        let body = bincode::serialize(&stat_svc::SimpleGetResponse { server_time: 9 }).unwrap();
        let reply = uni_frame(request.sequence, &request.command, request.uin, 0, body, &[3; 16])
            .unwrap();
        let packet = processor.unwrap(&reply).unwrap();
        assert!(matches!(
            packet.payload,
            PacketPayload::SimpleGet(stat_svc::SimpleGetResponse { server_time: 9 })
        ));
        assert!(matches!(processor.route(packet), Routed::Delivered));
        assert!(wrapped.reply.take().unwrap().try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_uni_request_before_login_is_rejected() {
        let keys = SessionKeys::default();
        assert!(keys.open(&[0; 16]).is_err());
    }
}
