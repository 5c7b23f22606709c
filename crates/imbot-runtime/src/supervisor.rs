//! Keep-alive supervisor
//!
//! Watches the live handler and asks the selector for a replacement whenever
//! it closes with a recoverable reason. Stops once the selector is closed or
//! gives up.

use std::sync::Arc;

use imbot_core::errors::ImbotError;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::selector::NetworkHandlerSelector;

pub struct KeepAliveSupervisor {
    selector: Arc<NetworkHandlerSelector>,
}

impl KeepAliveSupervisor {
    pub fn new(selector: Arc<NetworkHandlerSelector>) -> Self {
        Self { selector }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!("Keep-alive supervisor started");
        loop {
            let handler = match self.selector.resumed_handler().await {
                Ok(handler) => handler,
                Err(ImbotError::SelectorClosed) => {
                    info!("Keep-alive supervisor stopped");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Keep-alive supervisor gave up");
                    return;
                }
            };

            let reason = handler.wait_closed().await;
            if self.selector.is_closed() {
                info!("Keep-alive supervisor stopped");
                return;
            }
            info!(handler = %handler.id(), reason = %reason, "Live handler closed");
        }
    }
}
