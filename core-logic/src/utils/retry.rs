//! # Core Logic - Retry Policy
//!
//! Backoff curves keyed by failure class plus a cancellable retry driver.
//! Rate-limited failures back off exponentially from a 5s base; every other
//! transient failure waits a fixed 2s. Both curves share one attempt cap.

use crate::error::RetryError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a retryable attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// HTTP 429 or an RPC "request too fast" style rejection.
    RateLimited,
    /// Timeouts, connection resets, missing fields in an otherwise valid reply.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Wait(Duration),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, first try included.
    pub max_attempts: u32,
    pub rate_limit_base_ms: u64,
    pub transient_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_auth()
    }
}

impl RetryPolicy {
    pub const RATE_LIMIT_BASE_MS: u64 = 5_000;
    pub const TRANSIENT_DELAY_MS: u64 = 2_000;
    pub const AUTH_MAX_ATTEMPTS: u32 = 5;
    pub const ONCHAIN_MAX_ATTEMPTS: u32 = 3;

    pub fn new(max_attempts: u32, rate_limit_base_ms: u64, transient_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            rate_limit_base_ms,
            transient_delay_ms,
        }
    }

    pub fn for_auth() -> Self {
        Self::new(
            Self::AUTH_MAX_ATTEMPTS,
            Self::RATE_LIMIT_BASE_MS,
            Self::TRANSIENT_DELAY_MS,
        )
    }

    pub fn for_onchain() -> Self {
        Self::new(
            Self::ONCHAIN_MAX_ATTEMPTS,
            Self::RATE_LIMIT_BASE_MS,
            Self::TRANSIENT_DELAY_MS,
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Raw backoff curve, ignoring the attempt cap.
    ///
    /// `attempt` is the zero-based index of the attempt that just failed.
    pub fn delay(&self, attempt: u32, class: FailureClass) -> Duration {
        match class {
            FailureClass::RateLimited => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(self.rate_limit_base_ms.saturating_mul(factor))
            }
            FailureClass::Transient => Duration::from_millis(self.transient_delay_ms),
        }
    }

    /// Wait before the next attempt, or stop once the cap is reached.
    pub fn next_delay(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        if attempt.saturating_add(1) >= self.max_attempts {
            RetryDecision::Stop
        } else {
            RetryDecision::Wait(self.delay(attempt, class))
        }
    }
}

/// Result of a single attempt handed back to [`with_policy`].
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry { class: FailureClass, reason: String },
}

impl<T> Attempt<T> {
    pub fn rate_limited(reason: impl Into<String>) -> Self {
        Attempt::Retry {
            class: FailureClass::RateLimited,
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Attempt::Retry {
            class: FailureClass::Transient,
            reason: reason.into(),
        }
    }
}

/// Attempt counter and last error for one invocation. Never outlives it.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<String>,
}

/// Runs `operation` until it yields [`Attempt::Done`], the policy says stop, or
/// `cancel` fires. The closure receives the zero-based attempt index.
pub async fn with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut state = RetryState::default();

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                operation: operation_name.to_string(),
                attempts: state.attempt,
            });
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    operation: operation_name.to_string(),
                    attempts: state.attempt,
                });
            }
            result = operation(state.attempt) => result,
        };

        match result {
            Attempt::Done(value) => {
                if state.attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, state.attempt + 1);
                }
                return Ok(value);
            }
            Attempt::Retry { class, reason } => {
                let decision = policy.next_delay(state.attempt, class);
                state.last_error = Some(reason);

                let delay = match decision {
                    RetryDecision::Stop => {
                        return Err(RetryError::Exhausted {
                            operation: operation_name.to_string(),
                            attempts: state.attempt + 1,
                            last_error: state.last_error.take().unwrap_or_default(),
                        });
                    }
                    RetryDecision::Wait(delay) => delay,
                };

                info!(
                    target: "task_result",
                    "{} attempt {}/{} failed ({:?}): {}. Retrying in {:.1}s",
                    operation_name,
                    state.attempt + 1,
                    policy.max_attempts,
                    class,
                    state.last_error.as_deref().unwrap_or_default(),
                    delay.as_secs_f64()
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled {
                            operation: operation_name.to_string(),
                            attempts: state.attempt + 1,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                state.attempt += 1;
            }
        }
    }
}

/// Sleeps for `duration` unless `cancel` fires first. Returns `false` when
/// cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Maps an RPC or transport error message onto a retry class.
///
/// Returns `None` for failures that retrying will not fix.
pub fn classify_error_message(message: &str) -> Option<FailureClass> {
    let msg = message.to_lowercase();

    // A bare "429" also shows up inside hashes and addresses.
    let rate_limit_patterns = [
        "http 429",
        "status 429",
        "status code 429",
        "status: 429",
        "code: 429",
        "code 429",
        "(429 ",
        "too many requests",
        "rate limited",
        "limit exceeded",
        "request too fast",
    ];
    if rate_limit_patterns.iter().any(|p| msg.contains(p)) {
        return Some(FailureClass::RateLimited);
    }

    let transient_patterns = [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "connection closed",
        "error sending request",
        "network error",
        "temporary failure",
        "service unavailable",
        "tx_replay_attack",
        "nonce too low",
        "already known",
        "replacement transaction underpriced",
    ];
    if transient_patterns.iter().any(|p| msg.contains(p)) {
        return Some(FailureClass::Transient);
    }

    None
}

pub fn classify_error(error: &anyhow::Error) -> Option<FailureClass> {
    classify_error_message(&format!("{:#}", error))
}
