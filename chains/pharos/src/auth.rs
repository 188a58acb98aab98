use crate::client::{current_ip, ApiRequest, RawResult, Transport};
use crate::config::ApiConfig;
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use core_logic::{with_policy, Attempt, ProxyConfig, RetryError, RetryPolicy};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Login failed after {attempts} attempts: {reason}")]
    LoginFailed { attempts: u32, reason: String },

    #[error("Login cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("Failed to sign challenge: {0}")]
    Signing(String),
}

impl AuthError {
    pub fn attempts(&self) -> u32 {
        match self {
            AuthError::LoginFailed { attempts, .. } | AuthError::Cancelled { attempts } => *attempts,
            AuthError::Signing(_) => 0,
        }
    }
}

impl From<RetryError> for AuthError {
    fn from(e: RetryError) -> Self {
        match e {
            RetryError::Cancelled { attempts, .. } => AuthError::Cancelled { attempts },
            RetryError::Exhausted {
                attempts,
                last_error,
                ..
            } => AuthError::LoginFailed {
                attempts,
                reason: last_error,
            },
        }
    }
}

/// Bearer credential for one workflow invocation. Never cached or shared.
#[derive(Clone)]
pub struct Session {
    pub address: String,
    pub bearer: Zeroizing<String>,
    pub issued_at: DateTime<Utc>,
    pub login_attempts: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("bearer", &"***REDACTED***")
            .field("issued_at", &self.issued_at)
            .field("login_attempts", &self.login_attempts)
            .finish()
    }
}

pub struct AuthSession<'a> {
    transport: &'a dyn Transport,
    api: &'a ApiConfig,
    policy: RetryPolicy,
    log_proxy_ip: bool,
}

impl<'a> AuthSession<'a> {
    pub fn new(transport: &'a dyn Transport, api: &'a ApiConfig, policy: RetryPolicy) -> Self {
        Self {
            transport,
            api,
            policy,
            log_proxy_ip: false,
        }
    }

    pub fn with_proxy_ip_logging(mut self, enabled: bool) -> Self {
        self.log_proxy_ip = enabled;
        self
    }

    /// Signs the fixed challenge once, then exchanges the signature for a
    /// bearer token, retrying under the auth policy.
    pub async fn login(
        &self,
        identity: &Identity,
        proxy: Option<&ProxyConfig>,
        cancel: &CancellationToken,
        prefix: &str,
    ) -> Result<Session, AuthError> {
        let signature = identity
            .sign_challenge(&self.api.sign_message)
            .await
            .map_err(|e| AuthError::Signing(format!("{:#}", e)))?;

        let request = ApiRequest::post(&self.api.login_url)
            .query("address", identity.address())
            .query("signature", signature)
            .query("invite_code", self.api.invite_code.as_str());

        let operation = format!("{} login", prefix);
        let request = &request;
        let (bearer, attempt) = with_policy(&self.policy, &operation, cancel, move |attempt| {
            async move {
                if self.log_proxy_ip {
                    let ip = current_ip(self.transport, &self.api.ip_echo_url, proxy).await;
                    info!(
                        target: "task_result",
                        "{} Proxy IP: {} [attempt {}/{}]",
                        prefix,
                        ip,
                        attempt + 1,
                        self.policy.max_attempts
                    );
                }
                match extract_jwt(&self.transport.send(request, proxy).await) {
                    Attempt::Done(jwt) => Attempt::Done((jwt, attempt)),
                    Attempt::Retry { class, reason } => Attempt::Retry { class, reason },
                }
            }
        })
        .await?;

        info!(target: "task_result", "{} Login SUCCESS", prefix);
        Ok(Session {
            address: identity.address().to_string(),
            bearer: Zeroizing::new(bearer),
            issued_at: Utc::now(),
            login_attempts: attempt + 1,
        })
    }
}

/// A missing token is treated like a dropped connection: worth another try.
fn extract_jwt(raw: &RawResult) -> Attempt<String> {
    match raw {
        RawResult::Http { status: 429, .. } => Attempt::rate_limited("HTTP 429 Too Many Requests"),
        RawResult::Http { status, .. } if (200..300).contains(status) => {
            let jwt = raw.json().and_then(|v| {
                v.get("data")
                    .and_then(|d| d.get("jwt"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            });
            match jwt {
                Some(jwt) => Attempt::Done(jwt),
                None => Attempt::transient(format!("No JWT returned ({})", raw.describe())),
            }
        }
        RawResult::Http { .. } => Attempt::transient(raw.describe()),
        RawResult::Transport { message, .. } => Attempt::transient(message.clone()),
    }
}
