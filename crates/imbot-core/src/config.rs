//! Centralized Configuration Management
//!
//! All tunables of a bot instance live in [`BotConfiguration`]: protocol
//! variant, server addresses, heartbeat and timeout settings, the reconnect
//! policy, cache capacities and the message precedence table.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::message::precedence::PrecedenceTable;
use crate::{ImbotError, Result};

// ----------------------------------------------------------------------------
// Protocol Variants
// ----------------------------------------------------------------------------

/// Client variant the bot identifies as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    AndroidPhone,
    AndroidPad,
    AndroidWatch,
    Ipad,
    MacOs,
}

/// Static identification values sent during login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub apk_id: &'static str,
    pub app_id: u32,
    pub sub_app_id: u32,
    pub version: &'static str,
    pub sdk_version: &'static str,
    pub main_sig_map: u32,
    pub sub_sig_map: u32,
    pub build_time: u64,
    /// Whether the server accepts this variant alongside a phone login
    pub supports_multi_login: bool,
}

impl Protocol {
    pub fn info(self) -> ProtocolInfo {
        match self {
            Protocol::AndroidPhone => ProtocolInfo {
                apk_id: "com.tencent.mobileqq",
                app_id: 16,
                sub_app_id: 537_066_738,
                version: "8.5.0",
                sdk_version: "6.0.0.2454",
                main_sig_map: 34_869_472,
                sub_sig_map: 0x10400,
                build_time: 1_607_689_988,
                supports_multi_login: false,
            },
            Protocol::AndroidPad => ProtocolInfo {
                apk_id: "com.tencent.mobileqq",
                app_id: 16,
                sub_app_id: 537_062_409,
                version: "8.5.0",
                sdk_version: "6.0.0.2454",
                main_sig_map: 34_869_472,
                sub_sig_map: 0x10400,
                build_time: 1_607_689_988,
                supports_multi_login: true,
            },
            Protocol::AndroidWatch => ProtocolInfo {
                apk_id: "com.tencent.qqlite",
                app_id: 16,
                sub_app_id: 537_061_176,
                version: "2.0.5",
                sdk_version: "6.0.0.236",
                main_sig_map: 16_724_722,
                sub_sig_map: 0x10400,
                build_time: 1_559_564_731,
                supports_multi_login: true,
            },
            Protocol::Ipad => ProtocolInfo {
                apk_id: "com.tencent.minihd.qq",
                app_id: 16,
                sub_app_id: 537_151_363,
                version: "8.9.33.614",
                sdk_version: "6.0.0.2433",
                main_sig_map: 150_470_524,
                sub_sig_map: 66_560,
                build_time: 1_640_921_786,
                supports_multi_login: true,
            },
            Protocol::MacOs => ProtocolInfo {
                apk_id: "com.tencent.minihd.qq",
                app_id: 16,
                sub_app_id: 537_128_930,
                version: "5.8.9",
                sdk_version: "6.0.0.2433",
                main_sig_map: 150_470_524,
                sub_sig_map: 66_560,
                build_time: 1_595_836_208,
                supports_multi_login: true,
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Server Addresses
// ----------------------------------------------------------------------------

/// SSO server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = ImbotError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ImbotError::config_error(format!("missing port in `{}`", s)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ImbotError::config_error(format!("invalid port in `{}`", s)))?;
        if host.is_empty() {
            return Err(ImbotError::config_error(format!("missing host in `{}`", s)));
        }
        Ok(Self::new(host, port))
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Periodic keep-alive exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeartbeatKind {
    /// `Heartbeat.Alive`, keeps the TCP connection warm
    Alive,
    /// `StatSvc.SimpleGet`, keeps the online status
    Stat,
    /// `StatSvc.register`, periodic re-registration
    Register,
}

impl HeartbeatKind {
    pub fn command(self) -> &'static str {
        match self {
            HeartbeatKind::Alive => crate::protocol::commands::HEARTBEAT_ALIVE,
            HeartbeatKind::Stat => crate::protocol::commands::STAT_SIMPLE_GET,
            HeartbeatKind::Register => crate::protocol::commands::STAT_REGISTER,
        }
    }
}

impl fmt::Display for HeartbeatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatKind::Alive => write!(f, "Alive"),
            HeartbeatKind::Stat => write!(f, "Stat"),
            HeartbeatKind::Register => write!(f, "Register"),
        }
    }
}

/// Which status heartbeat runs next to the alive heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatStrategy {
    /// Alive + `StatSvc.SimpleGet`
    StatHb,
    /// Alive + periodic `StatSvc.register`
    Register,
    /// Alive only
    None,
}

impl HeartbeatStrategy {
    /// Heartbeat kinds scheduled under this strategy
    pub fn kinds(self) -> &'static [HeartbeatKind] {
        match self {
            HeartbeatStrategy::StatHb => &[HeartbeatKind::Alive, HeartbeatKind::Stat],
            HeartbeatStrategy::Register => &[HeartbeatKind::Alive, HeartbeatKind::Register],
            HeartbeatStrategy::None => &[HeartbeatKind::Alive],
        }
    }
}

/// Heartbeat periods and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Period of the alive heartbeat
    pub period: Duration,
    /// Period of the stat or register heartbeat
    pub stat_period: Duration,
    /// How long to wait for a heartbeat reply
    pub timeout: Duration,
    pub strategy: HeartbeatStrategy,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            stat_period: Duration::from_secs(300),
            timeout: Duration::from_secs(5),
            strategy: HeartbeatStrategy::StatHb,
        }
    }
}

impl HeartbeatConfig {
    pub fn period_for(&self, kind: HeartbeatKind) -> Duration {
        match kind {
            HeartbeatKind::Alive => self.period,
            HeartbeatKind::Stat | HeartbeatKind::Register => self.stat_period,
        }
    }
}

// ----------------------------------------------------------------------------
// Timeouts
// ----------------------------------------------------------------------------

/// Bounds on every suspension point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Establishing the transport
    pub connect: Duration,
    /// A single login round trip
    pub login: Duration,
    /// Waiting for a handler to become ready before sending
    pub ready: Duration,
    /// Default reply timeout for application requests
    pub request: Duration,
    /// Waiting for a verification answer from the login solver
    pub verification: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            login: Duration::from_secs(15),
            ready: Duration::from_secs(30),
            request: Duration::from_secs(5),
            verification: Duration::from_secs(300),
        }
    }
}

// ----------------------------------------------------------------------------
// Reconnect Policy
// ----------------------------------------------------------------------------

/// Exponential backoff with an attempt ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Attempts per resolution before the selector turns terminal
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

// ----------------------------------------------------------------------------
// Key Refresh
// ----------------------------------------------------------------------------

/// Session key rotation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRefreshConfig {
    /// How often `wtlogin.exchange_emp` refreshes session keys; `None` disables it
    pub interval: Option<Duration>,
    /// How long the previous session key is still accepted after a rotation
    pub rotation_grace: Duration,
}

impl Default for KeyRefreshConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(12 * 60 * 60)),
            rotation_grace: Duration::from_secs(60),
        }
    }
}

// ----------------------------------------------------------------------------
// Caches
// ----------------------------------------------------------------------------

/// Capacities of the duplicate suppression caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub friend_messages: usize,
    pub group_messages: usize,
    pub online_push: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            friend_messages: 50,
            group_messages: 50,
            online_push: 50,
        }
    }
}

// ----------------------------------------------------------------------------
// Bot Configuration
// ----------------------------------------------------------------------------

/// Public key used by the default SSO servers for login key agreement
pub const DEFAULT_SERVER_PUBLIC_KEY: [u8; 32] = [
    0x04, 0xeb, 0xca, 0x94, 0xd7, 0x33, 0xe3, 0x99, 0xb2, 0xdb, 0x96, 0xea, 0xcd, 0xd3, 0xf6,
    0x9a, 0x8b, 0xb0, 0xf7, 0x42, 0x24, 0xe2, 0xb4, 0x4e, 0x33, 0x57, 0x81, 0x22, 0x11, 0xd2,
    0xe6, 0x2e,
];

/// Complete configuration of one bot instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub protocol: Protocol,
    /// Servers tried in order; pushed server lists take precedence once received
    pub servers: Vec<ServerAddress>,
    pub server_public_key: [u8; 32],
    pub heartbeat: HeartbeatConfig,
    pub timeouts: TimeoutConfig,
    pub reconnect: ReconnectPolicy,
    /// Reconnect after the server forced this client offline
    pub auto_reconnect_on_force_offline: bool,
    pub key_refresh: KeyRefreshConfig,
    pub caches: CacheConfig,
    /// Capacity of the per-handler outbound queue
    pub outbound_queue_size: usize,
    /// Log every sent and received packet at debug level
    pub packet_debug: bool,
    /// Fixed first sequence number; random when unset
    pub initial_sequence: Option<u32>,
    /// Load friend and group lists before the handler reports ready
    pub load_contacts_on_login: bool,
    pub precedence: PrecedenceTable,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            protocol: Protocol::AndroidPhone,
            servers: vec![
                ServerAddress::new("msfwifi.3g.qq.com", 8080),
                ServerAddress::new("14.215.138.110", 8080),
                ServerAddress::new("113.96.12.224", 8080),
            ],
            server_public_key: DEFAULT_SERVER_PUBLIC_KEY,
            heartbeat: HeartbeatConfig::default(),
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectPolicy::default(),
            auto_reconnect_on_force_offline: false,
            key_refresh: KeyRefreshConfig::default(),
            caches: CacheConfig::default(),
            outbound_queue_size: 64,
            packet_debug: false,
            initial_sequence: None,
            load_contacts_on_login: true,
            precedence: PrecedenceTable::default(),
        }
    }
}

impl BotConfiguration {
    /// Short timers for tests against an in-process server
    pub fn testing() -> Self {
        Self {
            servers: vec![ServerAddress::new("127.0.0.1", 8080)],
            heartbeat: HeartbeatConfig {
                period: Duration::from_millis(200),
                stat_period: Duration::from_millis(400),
                timeout: Duration::from_millis(100),
                strategy: HeartbeatStrategy::StatHb,
            },
            timeouts: TimeoutConfig {
                connect: Duration::from_millis(500),
                login: Duration::from_millis(500),
                ready: Duration::from_secs(2),
                request: Duration::from_millis(500),
                verification: Duration::from_secs(1),
            },
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(10),
                multiplier: 2.0,
                max_delay: Duration::from_millis(100),
                max_attempts: 5,
            },
            key_refresh: KeyRefreshConfig {
                interval: None,
                rotation_grace: Duration::from_secs(1),
            },
            initial_sequence: Some(1000),
            ..Self::default()
        }
    }

    /// Fewer keep-alive exchanges for long-lived low traffic bots
    pub fn low_traffic() -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                period: Duration::from_secs(270),
                stat_period: Duration::from_secs(600),
                timeout: Duration::from_secs(10),
                strategy: HeartbeatStrategy::Register,
            },
            ..Self::default()
        }
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(ImbotError::config_error("at least one server is required"));
        }
        if self.heartbeat.period.is_zero() || self.heartbeat.stat_period.is_zero() {
            return Err(ImbotError::config_error("heartbeat periods must be non-zero"));
        }
        if self.heartbeat.timeout.is_zero() {
            return Err(ImbotError::config_error("heartbeat timeout must be non-zero"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ImbotError::config_error(
                "reconnect multiplier must be at least 1.0",
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ImbotError::config_error("reconnect max_attempts must be positive"));
        }
        if self.outbound_queue_size == 0 {
            return Err(ImbotError::config_error("outbound queue size must be positive"));
        }
        if self.caches.friend_messages == 0
            || self.caches.group_messages == 0
            || self.caches.online_push == 0
        {
            return Err(ImbotError::config_error("cache capacities must be positive"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = BotConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat.period, Duration::from_secs(60));
        assert_eq!(config.heartbeat.stat_period, Duration::from_secs(300));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(5));
        assert!(!config.auto_reconnect_on_force_offline);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(BotConfiguration::testing().validate().is_ok());
        assert!(BotConfiguration::low_traffic().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_servers() {
        let mut config = BotConfiguration::default();
        config.servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_server_address_parsing() {
        let address: ServerAddress = "msfwifi.3g.qq.com:8080".parse().unwrap();
        assert_eq!(address.host, "msfwifi.3g.qq.com");
        assert_eq!(address.port, 8080);
        assert_eq!(address.to_string(), "msfwifi.3g.qq.com:8080");

        assert!("no-port".parse::<ServerAddress>().is_err());
        assert!(":80".parse::<ServerAddress>().is_err());
        assert!("host:99999".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn test_strategy_kinds() {
        assert_eq!(
            HeartbeatStrategy::StatHb.kinds(),
            &[HeartbeatKind::Alive, HeartbeatKind::Stat]
        );
        assert_eq!(HeartbeatStrategy::None.kinds(), &[HeartbeatKind::Alive]);
    }

    #[test]
    fn test_configuration_serde_roundtrip() {
        let config = BotConfiguration::testing();
        let bytes = bincode::serialize(&config).unwrap();
        let decoded: BotConfiguration = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.servers, config.servers);
        assert_eq!(decoded.initial_sequence, Some(1000));
    }
}
