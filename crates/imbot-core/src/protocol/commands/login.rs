//! `wtlogin.*` bodies
//!
//! Login bodies are TLV blocks prefixed with a `u16` sub-command. Responses are
//! `u16` sub-command, `u8` result code and a TLV block. On success TLV `0x119`
//! holds the session material sealed with the random key the client sent in
//! its login envelope.

use sha2::{Digest, Sha256};

use crate::account::{AccountSecrets, DeviceInfo};
use crate::config::ProtocolInfo;
use crate::crypto::tea;
use crate::errors::{ImbotError, LoginError, Result};
use crate::protocol::io::{ByteReader, ByteWriter};
use crate::protocol::packet::OutgoingRequest;
use crate::protocol::tlv::{TlvBlock, TlvMap};
use crate::types::{Timestamp, Uin};
use crate::utils::random_u32;

use super::{WTLOGIN_EXCHANGE_EMP, WTLOGIN_LOGIN};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Sub-commands
pub mod sub {
    pub const PASSWORD: u16 = 9;
    pub const SUBMIT_CAPTCHA: u16 = 2;
    pub const SUBMIT_SMS: u16 = 7;
    pub const REQUEST_SMS: u16 = 8;
    pub const FAST_LOGIN: u16 = 15;
    pub const REFRESH_KEYS: u16 = 11;
    pub const DEVICE_LOCK: u16 = 20;
}

/// Result codes
pub mod result {
    pub const SUCCESS: u8 = 0;
    pub const WRONG_PASSWORD: u8 = 1;
    pub const CAPTCHA: u8 = 2;
    pub const ERROR: u8 = 9;
    pub const UNSAFE_DEVICE: u8 = 160;
    pub const DEVICE_LOCK: u8 = 204;
}

/// TLV tags
pub mod tag {
    pub const T1: u16 = 0x1;
    pub const T2: u16 = 0x2;
    pub const T8: u16 = 0x8;
    pub const T18: u16 = 0x18;
    pub const T100: u16 = 0x100;
    pub const T104: u16 = 0x104;
    pub const T105: u16 = 0x105;
    pub const T106: u16 = 0x106;
    pub const T107: u16 = 0x107;
    pub const T116: u16 = 0x116;
    pub const T119: u16 = 0x119;
    pub const T10A: u16 = 0x10A;
    pub const T11A: u16 = 0x11A;
    pub const T133: u16 = 0x133;
    pub const T134: u16 = 0x134;
    pub const T141: u16 = 0x141;
    pub const T142: u16 = 0x142;
    pub const T143: u16 = 0x143;
    pub const T145: u16 = 0x145;
    pub const T146: u16 = 0x146;
    pub const T16A: u16 = 0x16A;
    pub const T174: u16 = 0x174;
    pub const T177: u16 = 0x177;
    pub const T178: u16 = 0x178;
    pub const T17A: u16 = 0x17A;
    pub const T17C: u16 = 0x17C;
    pub const T192: u16 = 0x192;
    pub const T193: u16 = 0x193;
    pub const T204: u16 = 0x204;
    pub const T305: u16 = 0x305;
    pub const T401: u16 = 0x401;
    pub const T402: u16 = 0x402;
}

/// Error code from TLV `0x146` that means "try again later"
pub const RETRY_LATER_CODE: u32 = 0x9a;

// ----------------------------------------------------------------------------
// Request Building
// ----------------------------------------------------------------------------

/// Values every login body needs
#[derive(Debug, Clone, Copy)]
pub struct LoginContext<'a> {
    pub uin: Uin,
    pub protocol: ProtocolInfo,
    pub device: &'a DeviceInfo,
}

impl LoginContext<'_> {
    fn t1(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(1)
            .write_u32(random_u32())
            .write_u64(self.uin)
            .write_u32(Timestamp::now().as_secs())
            .write_u32(0)
            .write_u16(0);
        w.into_bytes()
    }

    fn t8(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(0).write_u32(2052).write_u16(0);
        w.into_bytes()
    }

    fn t18(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(1)
            .write_u32(1536)
            .write_u32(self.protocol.app_id)
            .write_u32(0)
            .write_u64(self.uin)
            .write_u16(0)
            .write_u16(0);
        w.into_bytes()
    }

    fn t100(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(1)
            .write_u32(7)
            .write_u32(self.protocol.app_id)
            .write_u32(self.protocol.sub_app_id)
            .write_u32(0)
            .write_u32(self.protocol.main_sig_map);
        w.into_bytes()
    }

    fn t107(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(0).write_u8(0).write_u16(0).write_u8(1);
        w.into_bytes()
    }

    fn t116(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(0)
            .write_u32(self.protocol.main_sig_map)
            .write_u32(self.protocol.sub_sig_map)
            .write_u8(1)
            .write_u32(1_600_000_226);
        w.into_bytes()
    }

    fn t141(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(1)
            .write_u16_lv(b"")
            .write_u16(2)
            .write_u16_lv(b"wifi");
        w.into_bytes()
    }

    fn t142(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u16(0)
            .write_u16_lv(self.protocol.apk_id.as_bytes());
        w.into_bytes()
    }

    fn t145(&self) -> Vec<u8> {
        self.device.guid.to_vec()
    }

    fn t177(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(1)
            .write_u32(self.protocol.build_time as u32)
            .write_u16_lv(self.protocol.sdk_version.as_bytes());
        w.into_bytes()
    }

    fn t401(&self) -> Vec<u8> {
        let digest = Sha256::digest(self.device.guid);
        digest[..16].to_vec()
    }

    fn base_block(&self, subcommand: u16) -> (ByteWriter, TlvBlock) {
        let mut writer = ByteWriter::new();
        writer.write_u16(subcommand);
        (writer, TlvBlock::new())
    }

    fn finish(mut writer: ByteWriter, block: TlvBlock) -> Result<Vec<u8>> {
        writer.write_bytes(&block.encode()?);
        Ok(writer.into_bytes())
    }
}

/// Key sealing the password blob in TLV `0x106`
pub fn t106_key(password_md5: &[u8; 16], uin: Uin) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(password_md5);
    hasher.update([0u8; 4]);
    hasher.update((uin as u32).to_be_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

fn t106_password(ctx: &LoginContext<'_>, password_md5: &[u8; 16]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u16(4)
        .write_u32(random_u32())
        .write_u32(7)
        .write_u32(ctx.protocol.app_id)
        .write_u32(0)
        .write_u64(ctx.uin)
        .write_u32(Timestamp::now().as_secs())
        .write_u32(0)
        .write_u8(1)
        .write_bytes(password_md5)
        .write_u32(0)
        .write_u8(1)
        .write_bytes(&ctx.device.guid)
        .write_u32(ctx.protocol.sub_app_id)
        .write_u32(1)
        .write_u16_lv(ctx.uin.to_string().as_bytes());
    tea::encrypt(&w.into_bytes(), &t106_key(password_md5, ctx.uin))
}

/// Check that a TLV `0x106` blob was sealed for `uin` with `password_md5`
pub fn verify_t106(blob: &[u8], password_md5: &[u8; 16], uin: Uin) -> bool {
    let plain = match tea::decrypt(blob, &t106_key(password_md5, uin)) {
        Ok(plain) => plain,
        Err(_) => return false,
    };
    read_t106_identity(&plain)
        .map(|(blob_uin, md5)| blob_uin == uin && &md5 == password_md5)
        .unwrap_or(false)
}

fn read_t106_identity(plain: &[u8]) -> Result<(Uin, [u8; 16])> {
    let mut reader = ByteReader::new(plain);
    reader.skip(2 + 4 + 4 + 4 + 4)?;
    let uin = reader.read_u64()?;
    reader.skip(4 + 4 + 1)?;
    let md5: [u8; 16] = reader.read_array()?;
    Ok((uin, md5))
}

/// Full password login (`wtlogin.login`, sub-command 9)
pub fn password_login(ctx: &LoginContext<'_>, password_md5: &[u8; 16]) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::PASSWORD);
    block
        .push(tag::T18, ctx.t18())
        .push(tag::T1, ctx.t1())
        .push(tag::T106, t106_password(ctx, password_md5))
        .push(tag::T116, ctx.t116())
        .push(tag::T100, ctx.t100())
        .push(tag::T107, ctx.t107())
        .push(tag::T142, ctx.t142())
        .push(tag::T145, ctx.t145())
        .push(tag::T141, ctx.t141())
        .push(tag::T8, ctx.t8())
        .push(tag::T177, ctx.t177());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Answer to a picture captcha
pub fn submit_captcha(
    ctx: &LoginContext<'_>,
    answer: &str,
    sign: &[u8],
    t104: &[u8],
) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::SUBMIT_CAPTCHA);
    let mut t2 = ByteWriter::new();
    t2.write_u16(0)
        .write_u16_lv(answer.as_bytes())
        .write_u16_lv(sign);
    block
        .push(tag::T2, t2.into_bytes())
        .push(tag::T8, ctx.t8())
        .push(tag::T104, t104.to_vec())
        .push(tag::T116, ctx.t116());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Ticket from a slider captcha or an unsafe-device verification page
pub fn submit_ticket(ctx: &LoginContext<'_>, ticket: &str, t104: &[u8]) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::SUBMIT_CAPTCHA);
    block
        .push(tag::T193, ticket.as_bytes().to_vec())
        .push(tag::T8, ctx.t8())
        .push(tag::T104, t104.to_vec())
        .push(tag::T116, ctx.t116());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Ask the server to text a verification code
pub fn request_sms(ctx: &LoginContext<'_>, t104: &[u8], t174: &[u8]) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::REQUEST_SMS);
    block
        .push(tag::T8, ctx.t8())
        .push(tag::T104, t104.to_vec())
        .push(tag::T116, ctx.t116())
        .push(tag::T174, t174.to_vec())
        .push(tag::T17A, 9u32.to_be_bytes().to_vec());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Submit a texted verification code
pub fn submit_sms(
    ctx: &LoginContext<'_>,
    code: &str,
    t104: &[u8],
    t174: &[u8],
) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::SUBMIT_SMS);
    let mut t17c = ByteWriter::new();
    t17c.write_u16_lv(code.as_bytes());
    block
        .push(tag::T8, ctx.t8())
        .push(tag::T104, t104.to_vec())
        .push(tag::T116, ctx.t116())
        .push(tag::T174, t174.to_vec())
        .push(tag::T17C, t17c.into_bytes())
        .push(tag::T401, ctx.t401());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Confirm a device-lock login from a trusted device
pub fn device_lock_login(
    ctx: &LoginContext<'_>,
    t104: &[u8],
    t402: &[u8],
) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::DEVICE_LOCK);
    let mut t401 = Sha256::new();
    t401.update(ctx.device.guid);
    t401.update(t402);
    let digest = t401.finalize();
    block
        .push(tag::T8, ctx.t8())
        .push(tag::T104, t104.to_vec())
        .push(tag::T116, ctx.t116())
        .push(tag::T401, digest[..16].to_vec());
    Ok(OutgoingRequest::login(
        WTLOGIN_LOGIN,
        LoginContext::finish(writer, block)?,
    ))
}

/// Fast login replaying saved A1 (`wtlogin.exchange_emp`, sub-command 15)
pub fn fast_login(ctx: &LoginContext<'_>, secrets: &AccountSecrets) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::FAST_LOGIN);
    block
        .push(tag::T18, ctx.t18())
        .push(tag::T1, ctx.t1())
        .push(tag::T106, secrets.a1.clone())
        .push(tag::T116, ctx.t116())
        .push(tag::T100, ctx.t100())
        .push(tag::T107, ctx.t107())
        .push(tag::T142, ctx.t142())
        .push(tag::T145, ctx.t145())
        .push(tag::T16A, secrets.no_pic_sig.clone())
        .push(tag::T8, ctx.t8());
    Ok(OutgoingRequest::login(
        WTLOGIN_EXCHANGE_EMP,
        LoginContext::finish(writer, block)?,
    ))
}

/// Session key refresh (`wtlogin.exchange_emp`, sub-command 11)
pub fn refresh_keys(ctx: &LoginContext<'_>, secrets: &AccountSecrets) -> Result<OutgoingRequest> {
    let (writer, mut block) = ctx.base_block(sub::REFRESH_KEYS);
    block
        .push(tag::T100, ctx.t100())
        .push(tag::T10A, secrets.tgt.clone())
        .push(tag::T116, ctx.t116())
        .push(tag::T143, secrets.d2.clone())
        .push(tag::T142, ctx.t142())
        .push(tag::T145, ctx.t145());
    Ok(OutgoingRequest::login(
        WTLOGIN_EXCHANGE_EMP,
        LoginContext::finish(writer, block)?,
    ))
}

/// Parsed login request body (sub-command plus TLVs)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequestBody {
    pub subcommand: u16,
    pub tlvs: TlvMap,
}

impl LoginRequestBody {
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(body);
        let subcommand = reader.read_u16()?;
        let tlvs = TlvMap::read_from(&mut reader)?;
        Ok(Self { subcommand, tlvs })
    }

    /// Uin from TLV `0x1`
    pub fn uin(&self) -> Option<Uin> {
        let t1 = self.tlvs.get(tag::T1)?;
        let mut reader = ByteReader::new(t1);
        reader.skip(6).ok()?;
        reader.read_u64().ok()
    }

    /// Captcha answer from TLV `0x2`
    pub fn captcha_answer(&self) -> Option<String> {
        let t2 = self.tlvs.get(tag::T2)?;
        let mut reader = ByteReader::new(t2);
        reader.skip(2).ok()?;
        reader.read_u16_lv_string().ok()
    }

    /// Ticket from TLV `0x193`
    pub fn ticket(&self) -> Option<String> {
        let t193 = self.tlvs.get(tag::T193)?;
        String::from_utf8(t193.to_vec()).ok()
    }

    /// SMS code from TLV `0x17c`
    pub fn sms_code(&self) -> Option<String> {
        let t17c = self.tlvs.get(tag::T17C)?;
        ByteReader::new(t17c).read_u16_lv_string().ok()
    }
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// Raw login response; classified with [`LoginResponse::classify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub subcommand: u16,
    pub result: u8,
    pub tlvs: TlvMap,
}

/// Session material carried in TLV `0x119`
#[derive(Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub tgt: Vec<u8>,
    pub d2: Vec<u8>,
    pub d2_key: [u8; 16],
    pub wt_session_ticket: Vec<u8>,
    pub wt_session_ticket_key: [u8; 16],
    pub a1: Vec<u8>,
    pub no_pic_sig: Vec<u8>,
    pub nick: String,
}

impl core::fmt::Debug for LoginSuccess {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginSuccess")
            .field("nick", &self.nick)
            .field("tgt_len", &self.tgt.len())
            .field("d2_len", &self.d2.len())
            .finish()
    }
}

/// What the server asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    /// TLV `0x119` still sealed
    Success { sealed: Vec<u8> },
    Error { code: u32, title: String, message: String },
    PictureCaptcha { image: Vec<u8>, sign: Vec<u8>, t104: Vec<u8> },
    SliderCaptcha { url: String, t104: Vec<u8> },
    UnsafeDevice { url: String, t104: Vec<u8> },
    SmsRequired { phone: String, t104: Vec<u8>, t174: Vec<u8> },
    DeviceLock { t104: Vec<u8>, t402: Vec<u8> },
}

fn error_details(tlvs: &TlvMap) -> (u32, String, String) {
    let Some(t146) = tlvs.get(tag::T146) else {
        return (0, String::new(), String::new());
    };
    let mut reader = ByteReader::new(t146);
    let code = reader.read_u32().unwrap_or(0);
    let title = reader.read_u16_lv_string().unwrap_or_default();
    let message = reader.read_u16_lv_string().unwrap_or_default();
    (code, title, message)
}

impl LoginResponse {
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(body);
        let subcommand = reader.read_u16()?;
        let result = reader.read_u8()?;
        let tlvs = TlvMap::read_from(&mut reader)?;
        Ok(Self {
            subcommand,
            result,
            tlvs,
        })
    }

    pub fn encode(&self, block: &TlvBlock) -> Result<Vec<u8>> {
        let mut writer = ByteWriter::new();
        writer.write_u16(self.subcommand).write_u8(self.result);
        writer.write_bytes(&block.encode()?);
        Ok(writer.into_bytes())
    }

    /// Interpret the result code and the TLVs that go with it
    pub fn classify(&self) -> Result<LoginResult> {
        let t104 = || self.tlvs.get(tag::T104).unwrap_or_default().to_vec();
        match self.result {
            result::SUCCESS => Ok(LoginResult::Success {
                sealed: self.tlvs.require(tag::T119)?.to_vec(),
            }),
            result::CAPTCHA => {
                if let Some(url) = self.tlvs.get(tag::T192) {
                    Ok(LoginResult::SliderCaptcha {
                        url: String::from_utf8_lossy(url).into_owned(),
                        t104: t104(),
                    })
                } else {
                    let t105 = self.tlvs.require(tag::T105)?;
                    let mut reader = ByteReader::new(t105);
                    let sign = reader.read_u16_lv()?.to_vec();
                    let image = reader.read_u16_lv()?.to_vec();
                    Ok(LoginResult::PictureCaptcha {
                        image,
                        sign,
                        t104: t104(),
                    })
                }
            }
            result::UNSAFE_DEVICE => {
                if let Some(url) = self.tlvs.get(tag::T204) {
                    Ok(LoginResult::UnsafeDevice {
                        url: String::from_utf8_lossy(url).into_owned(),
                        t104: t104(),
                    })
                } else {
                    let t174 = self.tlvs.require(tag::T174)?.to_vec();
                    let phone = self
                        .tlvs
                        .get(tag::T178)
                        .map(|p| String::from_utf8_lossy(p).into_owned())
                        .unwrap_or_default();
                    Ok(LoginResult::SmsRequired {
                        phone,
                        t104: t104(),
                        t174,
                    })
                }
            }
            result::DEVICE_LOCK => Ok(LoginResult::DeviceLock {
                t104: t104(),
                t402: self.tlvs.get(tag::T402).unwrap_or_default().to_vec(),
            }),
            _ => {
                let (code, title, message) = error_details(&self.tlvs);
                Ok(LoginResult::Error {
                    code,
                    title,
                    message,
                })
            }
        }
    }
}

impl LoginResult {
    /// Map a server error into the login error taxonomy
    pub fn into_error(self) -> ImbotError {
        match self {
            LoginResult::Error { code, message, .. } if code == RETRY_LATER_CODE => {
                ImbotError::Login(LoginError::RetryLater { message })
            }
            LoginResult::Error { message, title, .. } => {
                let message = if message.is_empty() { title } else { message };
                ImbotError::Login(LoginError::WrongPassword { message })
            }
            other => ImbotError::Login(LoginError::UnexpectedResponse {
                reason: format!("{:?} is not an error", other),
            }),
        }
    }
}

impl LoginSuccess {
    /// Open TLV `0x119` with the random key from the login envelope
    pub fn open(sealed: &[u8], key: &[u8; 16]) -> Result<Self> {
        let plain = tea::decrypt(sealed, key)?;
        let tlvs = TlvMap::decode(&plain)?;
        Ok(Self {
            tgt: tlvs.require(tag::T10A)?.to_vec(),
            d2: tlvs.require(tag::T143)?.to_vec(),
            d2_key: tlvs.require_key(tag::T305)?,
            wt_session_ticket: tlvs.get(tag::T133).unwrap_or_default().to_vec(),
            wt_session_ticket_key: tlvs.get(tag::T134).map_or(Ok([0u8; 16]), |_| {
                tlvs.require_key(tag::T134)
            })?,
            a1: tlvs.get(tag::T106).unwrap_or_default().to_vec(),
            no_pic_sig: tlvs.get(tag::T16A).unwrap_or_default().to_vec(),
            nick: tlvs
                .get(tag::T11A)
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .unwrap_or_default(),
        })
    }

    /// Seal into TLV `0x119`
    pub fn seal(&self, key: &[u8; 16]) -> Result<Vec<u8>> {
        let mut block = TlvBlock::new();
        block
            .push(tag::T10A, self.tgt.clone())
            .push(tag::T143, self.d2.clone())
            .push(tag::T305, self.d2_key.to_vec())
            .push(tag::T133, self.wt_session_ticket.clone())
            .push(tag::T134, self.wt_session_ticket_key.to_vec())
            .push(tag::T106, self.a1.clone())
            .push(tag::T16A, self.no_pic_sig.clone())
            .push(tag::T11A, self.nick.as_bytes().to_vec());
        Ok(tea::encrypt(&block.encode()?, key))
    }

    /// Secrets worth persisting for the next connection
    pub fn to_secrets(&self, uin: Uin, guid: [u8; 16]) -> AccountSecrets {
        AccountSecrets {
            uin,
            a1: self.a1.clone(),
            no_pic_sig: self.no_pic_sig.clone(),
            tgt: self.tgt.clone(),
            d2: self.d2.clone(),
            d2_key: self.d2_key,
            wt_session_ticket: self.wt_session_ticket.clone(),
            wt_session_ticket_key: self.wt_session_ticket_key,
            guid,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
