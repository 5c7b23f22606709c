//! Periodic session key refresh through `wtlogin.exchange_emp`

use std::sync::Arc;

use imbot_core::errors::{ImbotError, LoginError, Result, SessionError};
use imbot_core::protocol::commands::login::{self, LoginResult};
use imbot_core::protocol::packet::PacketPayload;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

use crate::handler::{NetworkHandler, SendOptions};

/// Start the refresh task, if refresh is enabled
pub fn spawn(handler: &Arc<NetworkHandler>) -> Option<JoinHandle<()>> {
    let period = handler.context().config.key_refresh.interval?;
    let handler = Arc::clone(handler);
    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            // A failed refresh keeps the current keys; the next tick retries
            if let Err(e) = refresh(&handler).await {
                warn!(handler = %handler.id(), error = %e, "Session key refresh failed");
            }
        }
    }))
}

/// Exchange the current signatures for fresh session keys
pub async fn refresh(handler: &NetworkHandler) -> Result<()> {
    let processor = handler.processor();
    let secrets = processor
        .secrets()
        .ok_or(ImbotError::Session(SessionError::MissingKey {
            what: "session signatures",
        }))?;
    let request = processor.login_request(|ctx| login::refresh_keys(ctx, &secrets))?;
    let options = SendOptions::new(handler.context().config.timeouts.login).fail_fast();
    let payload = handler.send_and_expect(request, options).await?.into_payload()?;

    let PacketPayload::Login(response) = payload else {
        return Err(LoginError::UnexpectedResponse {
            reason: format!("{} in reply to a key refresh", payload.name()),
        }
        .into());
    };
    match response.classify()? {
        LoginResult::Success { sealed } => {
            let success = processor.open_login_success(&sealed)?;
            processor.install_login(&success)?;
            if let Some(secrets) = processor.secrets() {
                handler.context().secrets.save(secrets);
            }
            info!(handler = %handler.id(), "Session keys refreshed");
            Ok(())
        }
        other => Err(other.into_error()),
    }
}
