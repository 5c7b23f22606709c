//! Bot facade
//!
//! The outbound API an application uses: login, sending and recalling
//! messages, contact list refreshes and access to events. Every call goes
//! through the selector, so it waits for a reconnect in progress instead of
//! failing.

use std::sync::{Arc, Mutex};

use imbot_core::account::Account;
use imbot_core::config::BotConfiguration;
use imbot_core::errors::{ImbotError, MessageError, Result, SharedError};
use imbot_core::message::{ComposeContext, MessageChain, MessageSource, MessageTarget, SourceKind};
use imbot_core::protocol::commands::message_svc::{
    self, RecallRequest, RoutingHead, SendMessageRequest,
};
use imbot_core::protocol::packet::PacketPayload;
use imbot_core::types::{GroupCode, Timestamp, Uin};
use imbot_core::utils::random_u32;
use imbot_core::events::BotEvent;
use imbot_core::Deferred;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::builder::BotBuilder;
use crate::components::contact_updater;
use crate::contacts::ContactRegistry;
use crate::context::BotContext;
use crate::dispatcher::EventDispatcher;
use crate::handler::{NetworkHandler, SendOptions};
use crate::selector::NetworkHandlerSelector;
use crate::supervisor::KeepAliveSupervisor;

/// Identity of a message this bot sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub source: MessageSource,
    pub target: MessageTarget,
}

#[derive(Clone)]
pub struct Bot {
    context: Arc<BotContext>,
    selector: Arc<NetworkHandlerSelector>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Bot {
    pub fn builder(account: Account) -> BotBuilder {
        BotBuilder::new(account)
    }

    pub(crate) fn from_context(context: Arc<BotContext>) -> Self {
        let selector = Arc::new(NetworkHandlerSelector::new(Arc::clone(&context)));
        Self {
            context,
            selector,
            supervisor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn uin(&self) -> Uin {
        self.context.uin()
    }

    pub fn config(&self) -> &BotConfiguration {
        &self.context.config
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.context.events
    }

    pub fn contacts(&self) -> &Arc<ContactRegistry> {
        &self.context.contacts
    }

    pub fn selector(&self) -> &Arc<NetworkHandlerSelector> {
        &self.selector
    }

    pub fn is_online(&self) -> bool {
        self.selector.current().is_some_and(|h| h.is_online())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect and log in; keeps the connection alive afterwards
    pub async fn login(&self) -> Result<()> {
        self.selector.resumed_handler().await?;

        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if supervisor.as_ref().map_or(true, |task| task.is_finished()) {
            *supervisor = Some(KeepAliveSupervisor::new(Arc::clone(&self.selector)).spawn());
        }
        Ok(())
    }

    /// Close the connection for good
    pub async fn close(&self) {
        self.selector.close().await;
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = supervisor {
            let _ = task.await;
        }
        info!(uin = self.uin(), "Bot closed");
    }

    async fn handler(&self) -> Result<Arc<NetworkHandler>> {
        self.selector.resumed_handler().await
    }

    fn request_options(&self) -> SendOptions {
        SendOptions::new(self.context.config.timeouts.request)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn send_message(
        &self,
        target: MessageTarget,
        chain: &MessageChain,
    ) -> Result<MessageReceipt> {
        if chain.is_empty() {
            return Err(MessageError::InvalidContent {
                kind: "chain".into(),
                reason: "empty message".into(),
            }
            .into());
        }
        let envelope = self
            .context
            .events
            .broadcast_and_wait(BotEvent::MessagePreSend {
                target,
                chain: chain.clone(),
            })
            .await;
        if envelope.is_cancelled() {
            debug!(target = target.id(), "Send cancelled by listener");
            return Err(MessageError::SendCancelled { target: target.id() }.into());
        }
        let elems = self
            .context
            .messages
            .compose_bytes(chain, &ComposeContext::new(target))?;
        let random = random_u32();
        let time = Timestamp::now().as_secs();
        let routing = match target {
            MessageTarget::Friend(uin) => RoutingHead::Friend { uin },
            MessageTarget::Group(code) => RoutingHead::Group { code },
        };
        let request = message_svc::send_message(SendMessageRequest {
            routing,
            random,
            time,
            elems,
        });
        let command = request.command.clone();

        let handler = self.handler().await?;
        let payload = handler
            .send_and_expect(request, self.request_options())
            .await?
            .into_payload()?;
        let PacketPayload::SendMessage(response) = payload else {
            return Err(ImbotError::invalid_packet(format!(
                "{} in reply to {command}",
                payload.name()
            )));
        };
        if response.result != 0 {
            return Err(ImbotError::Rejected {
                command,
                code: response.result,
                message: response.message,
            });
        }

        let source = MessageSource {
            kind: target.source_kind(),
            from: self.uin(),
            target: target.id(),
            sequence: response.sequence,
            random,
            time: if response.send_time == 0 {
                time
            } else {
                response.send_time
            },
            preview: chain.content_to_string(),
        };
        debug!(target = target.id(), sequence = source.sequence, "Message sent");
        Ok(MessageReceipt { source, target })
    }

    /// Recall a message sent by this bot or, with permission, by a group member
    pub async fn recall(&self, source: &MessageSource) -> Result<()> {
        let request = message_svc::recall(match source.kind {
            SourceKind::Friend => RecallRequest::Friend {
                uin: source.target,
                sequence: source.sequence,
                random: source.random,
                time: source.time,
            },
            SourceKind::Group => RecallRequest::Group {
                code: source.target,
                sequence: source.sequence,
                random: source.random,
            },
        });
        let command = request.command.clone();

        let handler = self.handler().await?;
        let payload = handler
            .send_and_expect(request, self.request_options())
            .await?
            .into_payload()?;
        match payload {
            PacketPayload::Recall(response) if response.result == 0 => Ok(()),
            PacketPayload::Recall(response) => Err(ImbotError::Rejected {
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

    /// Recall without waiting; the result is delivered through the deferred
    pub fn recall_async(
        &self,
        source: MessageSource,
    ) -> Deferred<core::result::Result<(), SharedError>> {
        let deferred = Deferred::new();
        let completion = deferred.clone();
        let bot = self.clone();
        tokio::spawn(async move {
            let result = bot.recall(&source).await.map_err(Arc::new);
            completion.complete(result);
        });
        deferred
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub async fn refresh_friend_list(&self) -> Result<usize> {
        let handler = self.handler().await?;
        contact_updater::refresh_friends(&handler).await
    }

    pub async fn refresh_group_list(&self) -> Result<usize> {
        let handler = self.handler().await?;
        contact_updater::refresh_groups(&handler).await
    }

    pub async fn refresh_member_list(&self, group: GroupCode) -> Result<usize> {
        let handler = self.handler().await?;
        contact_updater::refresh_members(&handler, group).await
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("uin", &self.uin())
            .field("online", &self.is_online())
            .finish()
    }
}
