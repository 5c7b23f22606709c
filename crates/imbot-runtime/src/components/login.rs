//! Login flow
//!
//! Fast login with saved secrets is tried first. Otherwise, or when the
//! server rejects it, a password login runs and answers verification
//! challenges through a [`LoginSolver`] until the server reports success or
//! an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imbot_core::account::AccountSecrets;
use imbot_core::errors::{ImbotError, LoginError, Result};
use imbot_core::events::{BotEvent, VerificationAnswer, VerificationChallenge};
use imbot_core::protocol::commands::login::{self, LoginResult};
use imbot_core::protocol::packet::PacketPayload;
use imbot_core::protocol::sso::AuthEvent;
use imbot_core::protocol::OutgoingRequest;
use imbot_core::types::Uin;
use imbot_core::Deferred;
use tracing::{debug, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::handler::{NetworkHandler, SendOptions};

/// Verification rounds allowed in one password login
const MAX_VERIFICATION_ROUNDS: u32 = 8;

// ----------------------------------------------------------------------------
// Login Solver
// ----------------------------------------------------------------------------

/// Answers verification challenges raised during login
#[async_trait]
pub trait LoginSolver: Send + Sync {
    async fn solve(&self, uin: Uin, challenge: VerificationChallenge)
        -> Result<VerificationAnswer>;
}

/// Refuses every challenge
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLoginSolver;

#[async_trait]
impl LoginSolver for UnsupportedLoginSolver {
    async fn solve(
        &self,
        _uin: Uin,
        challenge: VerificationChallenge,
    ) -> Result<VerificationAnswer> {
        Err(LoginError::VerificationUnsupported {
            kind: challenge.kind().to_string(),
        }
        .into())
    }
}

/// Publishes challenges as `VerificationRequired` events and waits for a
/// listener to complete the attached responder
#[derive(Clone)]
pub struct EventLoginSolver {
    events: EventDispatcher,
    timeout: Duration,
}

impl EventLoginSolver {
    pub fn new(events: EventDispatcher, timeout: Duration) -> Self {
        Self { events, timeout }
    }
}

#[async_trait]
impl LoginSolver for EventLoginSolver {
    async fn solve(
        &self,
        uin: Uin,
        challenge: VerificationChallenge,
    ) -> Result<VerificationAnswer> {
        let kind = challenge.kind().to_string();
        let responder = Deferred::new();
        self.events.broadcast(BotEvent::VerificationRequired {
            uin,
            challenge,
            responder: responder.clone(),
        });
        match responder.wait_timeout(self.timeout).await {
            Ok(VerificationAnswer::Declined) | Err(_) => {
                Err(LoginError::VerificationDeclined { kind }.into())
            }
            Ok(answer) => Ok(answer),
        }
    }
}

// ----------------------------------------------------------------------------
// Flow
// ----------------------------------------------------------------------------

/// Log in on a freshly connected handler
pub async fn login(handler: &Arc<NetworkHandler>) -> Result<()> {
    let context = handler.context();
    let uin = context.uin();

    if let Some(secrets) = context.secrets.load(uin).filter(AccountSecrets::can_fast_login) {
        match fast_login(handler, &secrets).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_recoverable() && !matches!(e, ImbotError::Login(_)) => return Err(e),
            Err(e) => {
                warn!(uin, error = %e, "Fast login rejected, falling back to password");
                context.secrets.clear(uin);
            }
        }
    }

    match context.account.password_md5() {
        Some(password) => password_login(handler, password).await,
        None => Err(LoginError::NoSavedSession { uin }.into()),
    }
}

async fn fast_login(handler: &Arc<NetworkHandler>, secrets: &AccountSecrets) -> Result<()> {
    let processor = handler.processor();
    processor.restore_secrets(secrets);
    let request = processor.login_request(|ctx| login::fast_login(ctx, secrets))?;
    match exchange(handler, request).await? {
        LoginResult::Success { sealed } => finish(handler, &sealed),
        other => {
            processor.apply_auth(AuthEvent::Rejected)?;
            Err(other.into_error())
        }
    }
}

async fn password_login(handler: &Arc<NetworkHandler>, password: &[u8; 16]) -> Result<()> {
    let processor = handler.processor();
    let solver = Arc::clone(&handler.context().solver);
    let uin = handler.uin();

    let mut request = processor.login_request(|ctx| login::password_login(ctx, password))?;
    for round in 0..MAX_VERIFICATION_ROUNDS {
        let result = exchange(handler, request).await?;
        debug!(uin, round, "Login step answered");

        request = match result {
            LoginResult::Success { sealed } => return finish(handler, &sealed),
            error @ LoginResult::Error { .. } => {
                processor.apply_auth(AuthEvent::Rejected)?;
                return Err(error.into_error());
            }
            LoginResult::PictureCaptcha { image, sign, t104 } => {
                processor.apply_auth(AuthEvent::Challenge)?;
                let challenge = VerificationChallenge::PictureCaptcha { image };
                match solver.solve(uin, challenge).await? {
                    VerificationAnswer::Captcha(answer) => processor
                        .login_request(|ctx| login::submit_captcha(ctx, &answer, &sign, &t104))?,
                    other => return Err(unexpected_answer("PictureCaptcha", other)),
                }
            }
            LoginResult::SliderCaptcha { url, t104 } => {
                processor.apply_auth(AuthEvent::Challenge)?;
                match solver
                    .solve(uin, VerificationChallenge::SliderCaptcha { url })
                    .await?
                {
                    VerificationAnswer::Ticket(ticket) => {
                        processor.login_request(|ctx| login::submit_ticket(ctx, &ticket, &t104))?
                    }
                    other => return Err(unexpected_answer("SliderCaptcha", other)),
                }
            }
            LoginResult::UnsafeDevice { url, t104 } => {
                processor.apply_auth(AuthEvent::Challenge)?;
                match solver
                    .solve(uin, VerificationChallenge::UnsafeDevice { url })
                    .await?
                {
                    VerificationAnswer::Confirmed => {
                        processor.login_request(|ctx| login::password_login(ctx, password))?
                    }
                    VerificationAnswer::Ticket(ticket) => {
                        processor.login_request(|ctx| login::submit_ticket(ctx, &ticket, &t104))?
                    }
                    other => return Err(unexpected_answer("UnsafeDevice", other)),
                }
            }
            LoginResult::SmsRequired { phone, t104, t174 } => {
                processor.apply_auth(AuthEvent::Challenge)?;
                let sms = processor.login_request(|ctx| login::request_sms(ctx, &t104, &t174))?;
                if let error @ LoginResult::Error { .. } = exchange(handler, sms).await? {
                    processor.apply_auth(AuthEvent::Rejected)?;
                    return Err(error.into_error());
                }
                processor.apply_auth(AuthEvent::Challenge)?;
                match solver
                    .solve(uin, VerificationChallenge::Sms { phone })
                    .await?
                {
                    VerificationAnswer::SmsCode(code) => processor
                        .login_request(|ctx| login::submit_sms(ctx, &code, &t104, &t174))?,
                    other => return Err(unexpected_answer("Sms", other)),
                }
            }
            LoginResult::DeviceLock { t104, t402 } => {
                processor.apply_auth(AuthEvent::Challenge)?;
                processor.login_request(|ctx| login::device_lock_login(ctx, &t104, &t402))?
            }
        };
    }

    Err(LoginError::TooManyRounds {
        rounds: MAX_VERIFICATION_ROUNDS,
    }
    .into())
}

/// Send one login request and classify the answer.
///
/// The auth state enters `Authenticating` for the round trip and falls back
/// to `Unauthenticated` if no answer arrives.
async fn exchange(handler: &Arc<NetworkHandler>, request: OutgoingRequest) -> Result<LoginResult> {
    let processor = handler.processor();
    processor.apply_auth(AuthEvent::Begin)?;

    let timeout = handler.context().config.timeouts.login;
    let reply = match handler
        .send_and_expect(request, SendOptions::new(timeout).fail_fast())
        .await
    {
        Ok(packet) => packet.into_payload(),
        Err(e) => Err(e),
    };

    let classified = reply.and_then(|payload| match payload {
        PacketPayload::Login(response) => response.classify(),
        other => Err(LoginError::UnexpectedResponse {
            reason: format!("{} in reply to a login request", other.name()),
        }
        .into()),
    });
    if classified.is_err() {
        // Invalidated sessions reject this; the original error is what matters
        let _ = processor.apply_auth(AuthEvent::Rejected);
    }
    classified
}

fn finish(handler: &Arc<NetworkHandler>, sealed: &[u8]) -> Result<()> {
    let processor = handler.processor();
    let success = processor.open_login_success(sealed)?;
    processor.install_login(&success)?;
    if let Some(secrets) = processor.secrets() {
        handler.context().secrets.save(secrets);
    }
    info!(uin = handler.uin(), nick = %success.nick, "Login succeeded");
    Ok(())
}

fn unexpected_answer(kind: &str, answer: VerificationAnswer) -> ImbotError {
    LoginError::UnexpectedResponse {
        reason: format!("{answer:?} does not answer a {kind} challenge"),
    }
    .into()
}
