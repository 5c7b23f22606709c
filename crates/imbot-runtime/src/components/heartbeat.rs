//! Heartbeats and online registration
//!
//! One task per heartbeat kind of the configured strategy. A heartbeat that
//! gets no reply in time closes the handler with `HeartbeatFailed`; the
//! selector decides whether to reconnect.

use std::sync::Arc;

use imbot_core::config::HeartbeatKind;
use imbot_core::errors::{ImbotError, Result};
use imbot_core::protocol::commands::stat_svc::{self, OnlineStatus, RegisterRequest};
use imbot_core::protocol::packet::PacketPayload;
use imbot_core::protocol::CloseReason;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::handler::{NetworkHandler, SendOptions};

/// Start the heartbeat tasks of the configured strategy
pub fn spawn(handler: &Arc<NetworkHandler>) -> Vec<JoinHandle<()>> {
    let config = handler.context().config.heartbeat.clone();
    config
        .strategy
        .kinds()
        .iter()
        .map(|&kind| {
            let handler = Arc::clone(handler);
            let period = config.period_for(kind);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = beat(&handler, kind).await {
                        let error = ImbotError::heartbeat_failed(kind, e);
                        warn!(handler = %handler.id(), error = %error, "Heartbeat failed");
                        handler
                            .close(CloseReason::HeartbeatFailed(Arc::new(error)))
                            .await;
                        return;
                    }
                    debug!(handler = %handler.id(), %kind, "Heartbeat answered");
                }
            })
        })
        .collect()
}

/// Send a single heartbeat of `kind` and wait for its reply
pub async fn beat(handler: &NetworkHandler, kind: HeartbeatKind) -> Result<()> {
    let options = SendOptions::new(handler.context().config.heartbeat.timeout).fail_fast();
    match kind {
        HeartbeatKind::Alive => {
            handler.send_and_expect(stat_svc::alive(), options).await?;
        }
        HeartbeatKind::Stat => {
            handler.send_and_expect(stat_svc::simple_get(), options).await?;
        }
        HeartbeatKind::Register => register(handler, options).await?,
    }
    Ok(())
}

/// Announce the client as online; part of every login
pub async fn register_online(handler: &NetworkHandler) -> Result<()> {
    let options = SendOptions::new(handler.context().config.timeouts.request).fail_fast();
    register(handler, options).await?;
    info!(handler = %handler.id(), uin = handler.uin(), "Registered online");
    Ok(())
}

async fn register(handler: &NetworkHandler, options: SendOptions) -> Result<()> {
    let context = handler.context();
    let request = stat_svc::register(RegisterRequest {
        uin: context.uin(),
        status: OnlineStatus::Online,
        kick_other: false,
        guid: context.device.guid,
        os_version: context.device.os_version.clone(),
        model: context.device.model.clone(),
    });
    let command = request.command.clone();
    let packet = handler.send_for_session(request, options).await?;
    match packet.into_payload()? {
        PacketPayload::Register(response) if response.is_success() => Ok(()),
        PacketPayload::Register(response) => Err(ImbotError::Rejected {
            command,
            code: response.result,
            message: response.message,
        }),
        other => Err(ImbotError::invalid_packet(format!(
            "{} in reply to {command}",
            other.name()
        ))),
    }
}
