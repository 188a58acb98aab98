//! Raw API replies to [`Outcome`] values.
//!
//! Eligibility: `Success` means the identity may claim now.
//! Claim: `Success` means the claim went through.

use crate::client::RawResult;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_logic::Outcome;
use serde::Deserialize;

pub const MSG_OK: &str = "ok";
pub const MSG_ALREADY_CLAIMED: &str = "faucet did not cooldown";
pub const MSG_UNBOUND_ACCOUNT: &str = "user has not bound X account";

#[derive(Debug, Deserialize, Default)]
struct StatusData {
    // Field name is misspelled by the service.
    #[serde(default)]
    avaliable_timestamp: Option<i64>,
    #[serde(default)]
    is_able_to_faucet: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    #[serde(default)]
    data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
struct ClaimReply {
    #[serde(default)]
    msg: Option<String>,
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

pub fn classify_eligibility(raw: &RawResult, now: DateTime<Utc>, cooldown: Duration) -> Outcome {
    let (status, body) = match raw {
        RawResult::Transport { message, .. } => return Outcome::TransientFailure(message.clone()),
        RawResult::Http { status, body } => (*status, body),
    };

    if status == 429 {
        return Outcome::Cooldown(now + cooldown);
    }
    if !is_success_status(status) {
        return Outcome::PermanentFailure(raw.describe());
    }

    let reply: StatusReply = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(_) => return Outcome::PermanentFailure(format!("Malformed status body: {}", body)),
    };
    let data = match reply.data {
        Some(d) => d,
        None => return Outcome::PermanentFailure(format!("Status body without data: {}", body)),
    };

    let next = data
        .avaliable_timestamp
        .filter(|ts| *ts > 0)
        .and_then(from_unix);

    // Any reported next-available instant means cooldown, even one already
    // past; the store then treats the identity as eligible again right away.
    match (data.is_able_to_faucet, next) {
        (_, Some(at)) => Outcome::Cooldown(at),
        (Some(false), None) => Outcome::Cooldown(now + cooldown),
        (Some(true), None) => Outcome::Success,
        (None, None) => {
            Outcome::PermanentFailure(format!("Status body without eligibility: {}", body))
        }
    }
}

pub fn classify_claim(raw: &RawResult, now: DateTime<Utc>, cooldown: Duration) -> Outcome {
    let (status, body) = match raw {
        RawResult::Transport { message, .. } => return Outcome::TransientFailure(message.clone()),
        RawResult::Http { status, body } => (*status, body),
    };

    if status == 429 {
        return Outcome::Cooldown(now + cooldown);
    }

    let msg = serde_json::from_str::<ClaimReply>(body)
        .ok()
        .and_then(|r| r.msg)
        .unwrap_or_default();

    if is_success_status(status) && msg == MSG_OK {
        return Outcome::Success;
    }
    if msg == MSG_ALREADY_CLAIMED {
        return Outcome::Cooldown(now + cooldown);
    }
    if msg.contains(MSG_UNBOUND_ACCOUNT) {
        return Outcome::PermanentFailure(format!("Account not linked: {}", msg));
    }

    Outcome::PermanentFailure(raw.describe())
}
