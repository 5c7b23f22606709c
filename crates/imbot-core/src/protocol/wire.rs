//! Byte layouts of the outer frame, the SSO frame and the login envelope
//!
//! Every layer here is a plain struct with `encode`/`decode` in both
//! directions so the in-process test server can speak the protocol with the
//! same code. Encryption keys are chosen by the session processor; this module
//! only applies the key it is handed.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression as ZlibCompression};

use crate::crypto::tea;
use crate::errors::{ImbotError, PacketError, Result, SessionError, TransportError};
use crate::protocol::io::{ByteReader, ByteWriter};
use crate::protocol::packet::{Encryption, FrameKind};
use crate::types::SequenceId;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Frames above this size are rejected before allocation
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Inflated SSO bodies above this size are rejected
pub const MAX_DECOMPRESSED_SIZE: usize = 4 * MAX_FRAME_SIZE;

/// Return code for a session the server no longer knows
pub const SESSION_EXPIRED_CODE: i32 = -10008;

/// Command id of the login envelope
pub const LOGIN_ENVELOPE_COMMAND: u16 = 0x0810;

const ENVELOPE_START: u8 = 0x02;
const ENVELOPE_END: u8 = 0x03;
const ENVELOPE_REQUEST_METHOD: u8 = 0x87;

/// Body compression flags of an incoming SSO frame
pub mod compression {
    pub const RAW: u32 = 0;
    pub const ZLIB: u32 = 1;
    pub const RAW_NO_LENGTH: u32 = 8;
}

/// Key selector of a login envelope response
pub mod envelope_method {
    /// Share key, falling back to the random key
    pub const SHARE_KEY: u16 = 0;
    pub const SESSION_TICKET_KEY: u16 = 3;
    /// Fresh server public key follows; share key is re-derived
    pub const PEER_KEY: u16 = 4;
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), ZlibCompression::default());
    encoder
        .write_all(data)
        .map_err(|e| ImbotError::invalid_packet(format!("Compression failed: {}", e)))?;
    encoder.finish().map_err(|e| {
        ImbotError::invalid_packet(format!("Compression finalization failed: {}", e))
    })
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_limited(data, MAX_DECOMPRESSED_SIZE)
}

/// Inflate `data`, failing once the output would exceed `limit` bytes
pub fn decompress_limited(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(limit as u64 + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ImbotError::invalid_packet(format!("Decompression failed: {}", e)))?;
    if decompressed.len() > limit {
        return Err(PacketError::DecompressedTooLarge { max: limit }.into());
    }
    Ok(decompressed)
}

/// Seal with the key matching an encryption flag; `None` leaves bytes as is
pub fn seal(plain: &[u8], key: Option<&[u8; 16]>) -> Vec<u8> {
    match key {
        Some(key) => tea::encrypt(plain, key),
        None => plain.to_vec(),
    }
}

/// Length of the next frame if `buffer` starts with a complete length prefix
pub fn frame_length(prefix: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len < 4 {
        return Err(PacketError::MalformedHeader.into());
    }
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }
    Ok(len)
}

fn read_outer_prefix(reader: &mut ByteReader<'_>, total: usize) -> Result<(FrameKind, Encryption)> {
    let declared = reader.read_u32()? as usize;
    if declared != total {
        return Err(ImbotError::InvalidPacket(PacketError::PayloadTooSmall {
            expected: declared,
            actual: total,
        }));
    }
    let kind_raw = reader.read_u32()?;
    let kind = FrameKind::from_u32(kind_raw)
        .ok_or(ImbotError::InvalidPacket(PacketError::UnknownFrameKind(kind_raw)))?;
    let encryption_raw = reader.read_u8()?;
    let encryption = Encryption::from_u8(encryption_raw).ok_or(ImbotError::InvalidPacket(
        PacketError::UnsupportedEncryption(encryption_raw),
    ))?;
    Ok((kind, encryption))
}

// ----------------------------------------------------------------------------
// Outer Frames
// ----------------------------------------------------------------------------

/// Client to server outer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub kind: FrameKind,
    pub encryption: Encryption,
    /// Only carried on uni frames
    pub sequence: SequenceId,
    /// Only carried on login frames
    pub ticket: Vec<u8>,
    pub uin: String,
    /// SSO frame, already sealed
    pub payload: Vec<u8>,
}

impl RequestFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.payload.len() + 32);
        let len_at = w.reserve_u32();
        w.write_u32(self.kind as u32).write_u8(self.encryption as u8);
        match self.kind {
            FrameKind::Login => w.write_u32_lv(&self.ticket),
            FrameKind::Uni => w.write_u32(self.sequence.value()),
        };
        w.write_u8(0)
            .write_u32_lv(self.uin.as_bytes())
            .write_bytes(&self.payload);
        let total = w.len() as u32;
        w.patch_u32(len_at, total);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let (kind, encryption) = read_outer_prefix(&mut reader, bytes.len())?;
        let (sequence, ticket) = match kind {
            FrameKind::Login => (SequenceId::PLACEHOLDER, reader.read_u32_lv()?.to_vec()),
            FrameKind::Uni => (SequenceId(reader.read_u32()?), Vec::new()),
        };
        reader.skip(1)?;
        let uin = reader.read_u32_lv_string()?;
        Ok(Self {
            kind,
            encryption,
            sequence,
            ticket,
            uin,
            payload: reader.rest().to_vec(),
        })
    }
}

/// Server to client outer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub kind: FrameKind,
    pub encryption: Encryption,
    pub uin: String,
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.payload.len() + 24);
        let len_at = w.reserve_u32();
        w.write_u32(self.kind as u32)
            .write_u8(self.encryption as u8)
            .write_u8(0)
            .write_u32_lv(self.uin.as_bytes())
            .write_bytes(&self.payload);
        let total = w.len() as u32;
        w.patch_u32(len_at, total);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let (kind, encryption) = read_outer_prefix(&mut reader, bytes.len())?;
        reader.skip(1)?;
        let uin = reader.read_u32_lv_string()?;
        Ok(Self {
            kind,
            encryption,
            uin,
            payload: reader.rest().to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// SSO Frames
// ----------------------------------------------------------------------------

/// Plain SSO frame of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSso {
    pub sequence: SequenceId,
    pub app_id: u32,
    pub sub_app_id: u32,
    pub tgt: Vec<u8>,
    pub command: String,
    pub session_id: [u8; 4],
    pub imei: String,
    pub ksid: Vec<u8>,
    pub body: Vec<u8>,
}

impl RequestSso {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.body.len() + 96);
        let head_at = w.reserve_u32();
        w.write_u32(self.sequence.value())
            .write_u32(self.app_id)
            .write_u32(self.sub_app_id)
            .write_u32_lv(&self.tgt)
            .write_u32_lv(self.command.as_bytes())
            .write_u32_lv(&self.session_id)
            .write_u32_lv(self.imei.as_bytes())
            .write_u16_lv(&self.ksid);
        let head_len = w.len() as u32;
        w.patch_u32(head_at, head_len);
        w.write_u32_lv(&self.body);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = ByteReader::new(bytes);
        let head = outer.read_u32_lv()?;
        let body = outer.read_u32_lv()?.to_vec();

        let mut reader = ByteReader::new(head);
        Ok(Self {
            sequence: SequenceId(reader.read_u32()?),
            app_id: reader.read_u32()?,
            sub_app_id: reader.read_u32()?,
            tgt: reader.read_u32_lv()?.to_vec(),
            command: reader.read_u32_lv_string()?,
            session_id: {
                let raw = reader.read_u32_lv()?;
                raw.try_into().map_err(|_| PacketError::MalformedHeader)?
            },
            imei: reader.read_u32_lv_string()?,
            ksid: reader.read_u16_lv()?.to_vec(),
            body,
        })
    }
}

/// Plain SSO frame of a response or push, body already decompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSso {
    pub sequence: SequenceId,
    pub return_code: i32,
    pub extra: Vec<u8>,
    pub command: String,
    pub session_id: Vec<u8>,
    pub body: Vec<u8>,
}

impl ResponseSso {
    /// Encode, compressing the body with the given flag
    pub fn encode(&self, compression_flag: u32) -> Result<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(self.body.len() + 64);
        let head_at = w.reserve_u32();
        w.write_u32(self.sequence.value())
            .write_i32(self.return_code)
            .write_u32_lv(&self.extra)
            .write_u32_lv(self.command.as_bytes())
            .write_u32_lv(&self.session_id)
            .write_u32(compression_flag);
        let head_len = w.len() as u32;
        w.patch_u32(head_at, head_len);

        match compression_flag {
            compression::RAW => {
                w.write_u32_lv(&self.body);
            }
            compression::ZLIB => {
                w.write_u32_lv(&compress(&self.body)?);
            }
            compression::RAW_NO_LENGTH => {
                w.write_bytes(&self.body);
            }
            other => return Err(PacketError::UnsupportedCompression(other).into()),
        }
        Ok(w.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = ByteReader::new(bytes);
        let head = outer.read_u32_lv()?;

        let mut reader = ByteReader::new(head);
        let sequence = SequenceId(reader.read_u32()?);
        let return_code = reader.read_i32()?;
        let extra = reader.read_u32_lv()?.to_vec();
        let command = reader.read_u32_lv_string()?;
        let session_id = reader.read_u32_lv()?.to_vec();
        let compression_flag = reader.read_u32()?;

        let body = match compression_flag {
            compression::RAW => outer.read_u32_lv()?.to_vec(),
            compression::ZLIB => decompress(outer.read_u32_lv()?)?,
            compression::RAW_NO_LENGTH => outer.rest().to_vec(),
            other => return Err(PacketError::UnsupportedCompression(other).into()),
        };

        Ok(Self {
            sequence,
            return_code,
            extra,
            command,
            session_id,
            body,
        })
    }

    /// Map a non-zero return code to an error
    pub fn check_return_code(&self) -> Result<()> {
        match self.return_code {
            0 => Ok(()),
            SESSION_EXPIRED_CODE => Err(SessionError::Expired.into()),
            code => Err(PacketError::ReturnCode {
                code,
                command: self.command.clone(),
            }
            .into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Login Envelope
// ----------------------------------------------------------------------------

/// Client login envelope; `encrypted` is sealed with the share key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeRequest {
    pub command: u16,
    pub uin: u32,
    pub random_key: [u8; 16],
    pub public_key: [u8; 32],
    pub encrypted: Vec<u8>,
}

impl EnvelopeRequest {
    pub fn seal(
        uin: u32,
        random_key: [u8; 16],
        public_key: [u8; 32],
        share_key: &[u8; 16],
        body: &[u8],
    ) -> Self {
        Self {
            command: LOGIN_ENVELOPE_COMMAND,
            uin,
            random_key,
            public_key,
            encrypted: tea::encrypt(body, share_key),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.encrypted.len() + 64);
        w.write_u8(ENVELOPE_START);
        let len_at = w.len();
        w.write_u16(0)
            .write_u16(self.command)
            .write_u32(self.uin)
            .write_u8(ENVELOPE_REQUEST_METHOD)
            .write_bytes(&self.random_key)
            .write_u16_lv(&self.public_key)
            .write_bytes(&self.encrypted)
            .write_u8(ENVELOPE_END);
        let total = w.len() as u16;
        w.patch_u16(len_at, total);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let inner = envelope_inner(bytes)?;
        let mut reader = ByteReader::new(inner);
        let command = reader.read_u16()?;
        let uin = reader.read_u32()?;
        if reader.read_u8()? != ENVELOPE_REQUEST_METHOD {
            return Err(ImbotError::invalid_packet("unknown login envelope method"));
        }
        let random_key = reader.read_array()?;
        let public_key = reader
            .read_u16_lv()?
            .try_into()
            .map_err(|_| ImbotError::invalid_packet("login envelope public key size"))?;
        Ok(Self {
            command,
            uin,
            random_key,
            public_key,
            encrypted: reader.rest().to_vec(),
        })
    }

    pub fn open(&self, share_key: &[u8; 16]) -> Result<Vec<u8>> {
        tea::decrypt(&self.encrypted, share_key)
    }
}

/// Server login envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeResponse {
    pub command: u16,
    pub uin: u32,
    pub method: u16,
    /// Present with [`envelope_method::PEER_KEY`]
    pub peer_public_key: Option<[u8; 32]>,
    pub encrypted: Vec<u8>,
}

impl EnvelopeResponse {
    pub fn seal(
        uin: u32,
        method: u16,
        peer_public_key: Option<[u8; 32]>,
        key: &[u8; 16],
        body: &[u8],
    ) -> Self {
        Self {
            command: LOGIN_ENVELOPE_COMMAND,
            uin,
            method,
            peer_public_key,
            encrypted: tea::encrypt(body, key),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.encrypted.len() + 48);
        w.write_u8(ENVELOPE_START);
        let len_at = w.len();
        w.write_u16(0)
            .write_u16(self.command)
            .write_u32(self.uin)
            .write_u16(self.method);
        if let Some(key) = &self.peer_public_key {
            w.write_u16_lv(key);
        }
        w.write_bytes(&self.encrypted).write_u8(ENVELOPE_END);
        let total = w.len() as u16;
        w.patch_u16(len_at, total);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let inner = envelope_inner(bytes)?;
        let mut reader = ByteReader::new(inner);
        let command = reader.read_u16()?;
        let uin = reader.read_u32()?;
        let method = reader.read_u16()?;
        let peer_public_key = match method {
            envelope_method::PEER_KEY => Some(
                reader
                    .read_u16_lv()?
                    .try_into()
                    .map_err(|_| ImbotError::invalid_packet("login envelope peer key size"))?,
            ),
            envelope_method::SHARE_KEY | envelope_method::SESSION_TICKET_KEY => None,
            other => {
                return Err(ImbotError::invalid_packet(format!(
                    "unknown login envelope method {other}"
                )))
            }
        };
        Ok(Self {
            command,
            uin,
            method,
            peer_public_key,
            encrypted: reader.rest().to_vec(),
        })
    }
}

/// Strip start byte, length and end byte
fn envelope_inner(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 4 || bytes[0] != ENVELOPE_START || bytes[bytes.len() - 1] != ENVELOPE_END {
        return Err(ImbotError::invalid_packet("login envelope markers missing"));
    }
    let declared = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    if declared != bytes.len() {
        return Err(ImbotError::InvalidPacket(PacketError::PayloadTooSmall {
            expected: declared,
            actual: bytes.len(),
        }));
    }
    Ok(&bytes[3..bytes.len() - 1])
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EcdhKeyPair;
    use proptest::prelude::*;

    fn create_test_response_sso(body: Vec<u8>) -> ResponseSso {
        ResponseSso {
            sequence: SequenceId(70_002),
            return_code: 0,
            extra: Vec::new(),
            command: "MessageSvc.PushNotify".into(),
            session_id: vec![1, 2, 3, 4],
            body,
        }
    }

    #[test]
    fn test_request_frame_layout() {
        let frame = RequestFrame {
            kind: FrameKind::Uni,
            encryption: Encryption::D2Key,
            sequence: SequenceId(77),
            ticket: Vec::new(),
            uin: "10001".into(),
            payload: vec![9; 10],
        };
        let bytes = frame.encode();
        assert_eq!(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize, bytes.len());
        assert_eq!(&bytes[4..8], &0x0Bu32.to_be_bytes());
        assert_eq!(bytes[8], 1);
        assert_eq!(RequestFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_unknown_frame_kind_rejected() {
        let mut bytes = ResponseFrame {
            kind: FrameKind::Login,
            encryption: Encryption::EmptyKey,
            uin: "1".into(),
            payload: vec![],
        }
        .encode();
        bytes[7] = 0x0C;
        assert!(matches!(
            ResponseFrame::decode(&bytes),
            Err(ImbotError::InvalidPacket(PacketError::UnknownFrameKind(0x0C)))
        ));
    }

    #[test]
    fn test_response_sso_compression_flags() {
        let body = b"hello hello hello hello".repeat(8);
        for flag in [compression::RAW, compression::ZLIB, compression::RAW_NO_LENGTH] {
            let sso = create_test_response_sso(body.clone());
            let decoded = ResponseSso::decode(&sso.encode(flag).unwrap()).unwrap();
            assert_eq!(decoded.body, body, "flag {flag}");
        }
        assert!(create_test_response_sso(vec![]).encode(5).is_err());
    }

    #[test]
    fn test_return_codes() {
        let mut sso = create_test_response_sso(vec![]);
        assert!(sso.check_return_code().is_ok());

        sso.return_code = SESSION_EXPIRED_CODE;
        assert!(matches!(
            sso.check_return_code(),
            Err(ImbotError::Session(SessionError::Expired))
        ));

        sso.return_code = -10106;
        assert!(matches!(
            sso.check_return_code(),
            Err(ImbotError::InvalidPacket(PacketError::ReturnCode { code: -10106, .. }))
        ));
    }

    #[test]
    fn test_envelope_share_key_agreement() {
        let client = EcdhKeyPair::generate();
        let server = EcdhKeyPair::generate();
        let share = client.share_key(server.public_key());

        let request = EnvelopeRequest::seal(10001, [7; 16], *client.public_key(), &share, b"tlvs");
        let parsed = EnvelopeRequest::decode(&request.encode()).unwrap();
        let server_share = server.share_key(&parsed.public_key);
        assert_eq!(parsed.open(&server_share).unwrap(), b"tlvs");
        assert_eq!(parsed.random_key, [7; 16]);
    }

    #[test]
    fn test_envelope_response_peer_key() {
        let fresh = EcdhKeyPair::generate();
        let response = EnvelopeResponse::seal(
            10001,
            envelope_method::PEER_KEY,
            Some(*fresh.public_key()),
            &[3; 16],
            b"ok",
        );
        let parsed = EnvelopeResponse::decode(&response.encode()).unwrap();
        assert_eq!(parsed.peer_public_key, Some(*fresh.public_key()));
        assert_eq!(tea::decrypt(&parsed.encrypted, &[3; 16]).unwrap(), b"ok");
    }

    #[test]
    fn test_decompression_is_bounded() {
        let compressed = compress(&vec![0u8; 1 << 20]).unwrap();
        assert!(compressed.len() < 8 * 1024);

        assert!(matches!(
            decompress_limited(&compressed, 64 * 1024),
            Err(ImbotError::InvalidPacket(PacketError::DecompressedTooLarge { max: 65536 }))
        ));
        assert_eq!(decompress_limited(&compressed, 1 << 20).unwrap().len(), 1 << 20);
        assert_eq!(decompress(&compressed).unwrap().len(), 1 << 20);
    }

    #[test]
    fn test_frame_length_bounds() {
        assert!(frame_length(3u32.to_be_bytes()).is_err());
        assert!(frame_length((MAX_FRAME_SIZE as u32 + 1).to_be_bytes()).is_err());
        assert_eq!(frame_length(64u32.to_be_bytes()).unwrap(), 64);
    }

    proptest! {
        #[test]
        fn prop_request_sso_fields_survive(
            seq in any::<u32>(),
            command in "[A-Za-z.]{1,32}",
            body in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let sso = RequestSso {
                sequence: SequenceId(seq),
                app_id: 16,
                sub_app_id: 537_066_738,
                tgt: vec![],
                command,
                session_id: [0, 0, 0, 1],
                imei: "860000000000000".into(),
                ksid: vec![1],
                body,
            };
            prop_assert_eq!(RequestSso::decode(&sso.encode()).unwrap(), sso);
        }
    }
}
