#![doc = "imbot Harness\n\nAn in-process server that speaks the SSO wire protocol over the in-memory\ntransport, plus scripted scenarios, so runtime behaviour can be tested\nwithout a network."]

pub mod frames;
pub mod mock_server;
pub mod scenario;

pub use mock_server::{MockServer, ReceivedRequest, SentMessage};
pub use scenario::{LoginChallenge, Scenario, TEST_PASSWORD_MD5, TEST_UIN};

/// Route `tracing` output to the test writer; honours `RUST_LOG`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
