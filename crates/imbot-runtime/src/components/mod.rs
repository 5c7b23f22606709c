//! Per-bot components driven by the network handler

pub mod contact_updater;
pub mod heartbeat;
pub mod key_refresh;
pub mod login;
pub mod packet_handler;
pub mod packet_logger;
pub mod secrets;

pub use login::{EventLoginSolver, LoginSolver, UnsupportedLoginSolver};
pub use packet_logger::PacketLogger;
pub use secrets::{AccountSecretsStore, InMemorySecretsStore};
