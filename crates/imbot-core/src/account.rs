//! Account credentials, device identity and persisted login secrets

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::types::Uin;

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

/// How the bot proves its identity on a full login
#[derive(Clone, Serialize, Deserialize)]
pub enum Credentials {
    /// MD5 digest of the account password
    PasswordMd5([u8; 16]),
    /// Login only with saved secrets; fails if none are available
    SessionOnly,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::PasswordMd5(_) => write!(f, "PasswordMd5(..)"),
            Credentials::SessionOnly => write!(f, "SessionOnly"),
        }
    }
}

/// Bot account: id plus credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub uin: Uin,
    pub credentials: Credentials,
}

impl Account {
    pub fn new(uin: Uin, credentials: Credentials) -> Self {
        Self { uin, credentials }
    }

    pub fn password_md5(&self) -> Option<&[u8; 16]> {
        match &self.credentials {
            Credentials::PasswordMd5(md5) => Some(md5),
            Credentials::SessionOnly => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Device identity reported to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub guid: [u8; 16],
    pub imei: String,
    pub android_id: String,
    pub model: String,
    pub os_version: String,
}

impl DeviceInfo {
    /// Fresh random identity
    pub fn random() -> Self {
        let guid = *uuid::Uuid::new_v4().as_bytes();
        let imei_digits: String = guid
            .iter()
            .take(15)
            .map(|b| char::from(b'0' + (b % 10)))
            .collect();
        Self {
            guid,
            imei: imei_digits,
            android_id: hex::encode(&guid[..8]),
            model: "imbot".to_string(),
            os_version: "10".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Account Secrets
// ----------------------------------------------------------------------------

/// Signature material issued by the server, kept across connections so the next
/// connection can use fast login instead of a full password login
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSecrets {
    pub uin: Uin,
    /// Opaque A1 ticket replayed on fast login
    pub a1: Vec<u8>,
    pub no_pic_sig: Vec<u8>,
    pub tgt: Vec<u8>,
    pub d2: Vec<u8>,
    pub d2_key: [u8; 16],
    pub wt_session_ticket: Vec<u8>,
    pub wt_session_ticket_key: [u8; 16],
    pub guid: [u8; 16],
}

impl fmt::Debug for AccountSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecrets")
            .field("uin", &self.uin)
            .field("a1_len", &self.a1.len())
            .field("tgt_len", &self.tgt.len())
            .field("d2_len", &self.d2.len())
            .finish()
    }
}

impl AccountSecrets {
    /// Whether the secrets carry everything fast login needs
    pub fn can_fast_login(&self) -> bool {
        !self.a1.is_empty() && !self.no_pic_sig.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_devices_differ() {
        let a = DeviceInfo::random();
        let b = DeviceInfo::random();
        assert_ne!(a.guid, b.guid);
        assert_eq!(a.imei.len(), 15);
        assert!(a.imei.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::PasswordMd5([7u8; 16]);
        assert_eq!(format!("{:?}", credentials), "PasswordMd5(..)");
    }

    #[test]
    fn test_fast_login_requires_a1_and_sig() {
        let mut secrets = AccountSecrets::default();
        assert!(!secrets.can_fast_login());
        secrets.a1 = vec![1, 2, 3];
        secrets.no_pic_sig = vec![4];
        assert!(secrets.can_fast_login());
    }
}
