//! Daily faucet workflow for a single identity.
//!
//! `INIT -> AUTHENTICATING -> ELIGIBILITY_CHECK -> CLAIMING -> DONE(outcome)`,
//! with `AUTH_FAILED` and `SKIPPED_COOLDOWN` as early exits. The workflow only
//! reports; the scheduler owns the result log.

use crate::auth::{AuthError, AuthSession, Session};
use crate::classifier::{classify_claim, classify_eligibility};
use crate::client::{ApiRequest, Transport};
use crate::config::PharosConfig;
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use core_logic::{
    sleep_or_cancel, with_policy, Attempt, ConcurrencyLimiter, CooldownStore, OperationClass,
    Outcome, ProxyConfig, ResultKind, RetryError,
};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Authenticating,
    EligibilityCheck,
    Claiming,
}

/// Terminal state of one faucet run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaucetState {
    Done(Outcome),
    AuthFailed(String),
    SkippedCooldown(DateTime<Utc>),
    Cancelled,
}

impl FaucetState {
    /// Destination of the single result-log line, if any.
    pub fn result_kind(&self) -> Option<ResultKind> {
        match self {
            FaucetState::Done(Outcome::Success)
            | FaucetState::Done(Outcome::Cooldown(_))
            | FaucetState::SkippedCooldown(_) => Some(ResultKind::Success),
            FaucetState::Done(_) => Some(ResultKind::Failure),
            FaucetState::AuthFailed(_) | FaucetState::Cancelled => None,
        }
    }
}

impl fmt::Display for FaucetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaucetState::Done(outcome) => write!(f, "{}", outcome),
            FaucetState::AuthFailed(reason) => write!(f, "AUTH FAILED: {}", reason),
            FaucetState::SkippedCooldown(next) => write!(
                f,
                "SKIPPED (COOLDOWN until {})",
                next.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            FaucetState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Clone)]
pub struct FaucetReport {
    pub index: usize,
    pub address: String,
    /// Line for the result log; may carry the private key.
    pub log_entry: String,
    pub phases: Vec<Phase>,
    pub state: FaucetState,
    pub login_attempts: u32,
    pub eligibility_attempts: u32,
    pub claim_attempts: u32,
}

impl FaucetReport {
    fn new(index: usize, identity: &Identity, include_key: bool) -> Self {
        Self {
            index,
            address: identity.address().to_string(),
            log_entry: identity.log_entry(include_key),
            phases: vec![Phase::Init],
            state: FaucetState::Cancelled,
            login_attempts: 0,
            eligibility_attempts: 0,
            claim_attempts: 0,
        }
    }

    /// Whether the identity may go on to on-chain work in the same cycle.
    pub fn allows_onchain(&self) -> bool {
        matches!(
            self.state,
            FaucetState::Done(Outcome::Success)
                | FaucetState::Done(Outcome::Cooldown(_))
                | FaucetState::SkippedCooldown(_)
        )
    }

    pub fn reached(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

impl fmt::Debug for FaucetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetReport")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("phases", &self.phases)
            .field("state", &self.state)
            .field("login_attempts", &self.login_attempts)
            .field("eligibility_attempts", &self.eligibility_attempts)
            .field("claim_attempts", &self.claim_attempts)
            .finish()
    }
}

/// Shared collaborators of every faucet run.
#[derive(Clone)]
pub struct FaucetContext {
    pub transport: Arc<dyn Transport>,
    pub config: Arc<PharosConfig>,
    pub limiter: ConcurrencyLimiter,
    pub cooldowns: CooldownStore,
}

pub struct FaucetWorkflow {
    ctx: FaucetContext,
}

impl FaucetWorkflow {
    pub fn new(ctx: FaucetContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        identity: &Identity,
        index: usize,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
    ) -> FaucetReport {
        let prefix = format!("[{:03}][{}]", index + 1, identity.short());
        let mut report = FaucetReport::new(index, identity, self.ctx.config.log_private_keys);
        report.state = self
            .drive(&mut report, identity, proxy, cancel, &prefix)
            .await;

        match &report.state {
            FaucetState::AuthFailed(_) => {
                warn!(target: "task_result", "{} Faucet FAILED: {}", prefix, report.state)
            }
            FaucetState::Cancelled => debug!("{} Faucet run cancelled", prefix),
            state => info!(target: "task_result", "{} Faucet {}", prefix, state),
        }
        report
    }

    async fn drive(
        &self,
        report: &mut FaucetReport,
        identity: &Identity,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> FaucetState {
        let config = &self.ctx.config;

        let now = Utc::now();
        if !self.ctx.cooldowns.is_eligible(identity.address(), now) {
            let next = self
                .ctx
                .cooldowns
                .next_eligible(identity.address())
                .unwrap_or(now);
            return FaucetState::SkippedCooldown(next);
        }

        // Held for the whole run, login and claim included.
        let _claim_permit = match self
            .ctx
            .limiter
            .acquire_or_cancel(OperationClass::Claim, cancel)
            .await
        {
            Some(permit) => permit,
            None => return FaucetState::Cancelled,
        };

        let jitter = config.timing.claim_jitter();
        if !jitter.is_zero() {
            info!(
                target: "task_result",
                "{} Waiting {:.2}s before faucet",
                prefix,
                jitter.as_secs_f64()
            );
        }
        if !sleep_or_cancel(jitter, cancel).await {
            return FaucetState::Cancelled;
        }

        report.phases.push(Phase::Authenticating);
        let session = match self.authenticate(identity, proxy, cancel, prefix).await {
            Ok(session) => {
                report.login_attempts = session.login_attempts;
                session
            }
            Err(AuthError::Cancelled { attempts }) => {
                report.login_attempts = attempts;
                return FaucetState::Cancelled;
            }
            Err(e) => {
                report.login_attempts = e.attempts();
                return FaucetState::AuthFailed(e.to_string());
            }
        };

        report.phases.push(Phase::EligibilityCheck);
        match self.check_eligibility(&session, proxy, cancel, prefix).await {
            Ok((Outcome::Cooldown(next), attempts)) => {
                report.eligibility_attempts = attempts;
                self.ctx.cooldowns.record_cooldown(identity.address(), next);
                return FaucetState::SkippedCooldown(next);
            }
            Ok((Outcome::Success, attempts)) => {
                report.eligibility_attempts = attempts;
            }
            Ok((other, attempts)) => {
                report.eligibility_attempts = attempts;
                warn!(
                    target: "task_result",
                    "{} Faucet status inconclusive ({}), claiming anyway",
                    prefix,
                    other
                );
            }
            Err(e) if e.is_cancelled() => return FaucetState::Cancelled,
            Err(e) => {
                report.eligibility_attempts = e.attempts();
                warn!(
                    target: "task_result",
                    "{} Faucet status unavailable ({}), claiming anyway",
                    prefix,
                    e
                );
            }
        }

        report.phases.push(Phase::Claiming);
        let outcome = match self.claim(&session, proxy, cancel, prefix).await {
            Ok((outcome, attempts)) => {
                report.claim_attempts = attempts;
                outcome
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                report.claim_attempts = attempts;
                return FaucetState::Cancelled;
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
                ..
            }) => {
                report.claim_attempts = attempts;
                Outcome::PermanentFailure(last_error)
            }
        };

        if let Outcome::Cooldown(next) = &outcome {
            self.ctx.cooldowns.record_cooldown(identity.address(), *next);
        }
        FaucetState::Done(outcome)
    }

    async fn authenticate(
        &self,
        identity: &Identity,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> Result<Session, AuthError> {
        let _login_permit = self
            .ctx
            .limiter
            .acquire_or_cancel(OperationClass::Login, cancel)
            .await
            .ok_or(AuthError::Cancelled { attempts: 0 })?;

        AuthSession::new(
            self.ctx.transport.as_ref(),
            &self.ctx.config.api,
            self.ctx.config.auth_policy(),
        )
        .with_proxy_ip_logging(self.ctx.config.log_proxy_ip)
        .login(identity, proxy, cancel, prefix)
        .await
    }

    async fn check_eligibility(
        &self,
        session: &Session,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> Result<(Outcome, u32), RetryError> {
        let config = &self.ctx.config;
        let request = ApiRequest::get(&config.api.faucet_status_url)
            .query("address", session.address.as_str())
            .bearer(session.bearer.as_str());
        let request = &request;
        let transport = self.ctx.transport.as_ref();
        let cooldown = config.timing.cooldown();
        let operation = format!("{} faucet status", prefix);

        with_policy(&config.onchain_policy(), &operation, cancel, move |attempt| async move {
            let raw = transport.send(request, proxy).await;
            match classify_eligibility(&raw, Utc::now(), cooldown) {
                Outcome::TransientFailure(reason) => Attempt::transient(reason),
                outcome => Attempt::Done((outcome, attempt + 1)),
            }
        })
        .await
    }

    async fn claim(
        &self,
        session: &Session,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> Result<(Outcome, u32), RetryError> {
        let config = &self.ctx.config;
        let request = ApiRequest::post(&config.api.faucet_claim_url)
            .query("address", session.address.as_str())
            .bearer(session.bearer.as_str())
            .json(serde_json::json!({}));
        let request = &request;
        let transport = self.ctx.transport.as_ref();
        let cooldown = config.timing.cooldown();
        let operation = format!("{} faucet claim", prefix);

        with_policy(&config.onchain_policy(), &operation, cancel, move |attempt| async move {
            let raw = transport.send(request, proxy).await;
            match classify_claim(&raw, Utc::now(), cooldown) {
                Outcome::TransientFailure(reason) => Attempt::transient(reason),
                Outcome::PermanentFailure(reason) => {
                    debug!("Claim rejected, raw reply: {}", raw.describe());
                    Attempt::Done((Outcome::PermanentFailure(reason), attempt + 1))
                }
                outcome => Attempt::Done((outcome, attempt + 1)),
            }
        })
        .await
    }
}
