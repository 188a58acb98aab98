use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Classified result of one unit-of-work attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The server considers the resource consumed until the given instant.
    Cooldown(DateTime<Utc>),
    PermanentFailure(String),
    TransientFailure(String),
}

impl Outcome {
    pub fn is_cooldown(&self) -> bool {
        matches!(self, Outcome::Cooldown(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Cooldown(next) => write!(f, "COOLDOWN until {}", next.format("%Y-%m-%d %H:%M:%S UTC")),
            Outcome::PermanentFailure(reason) => write!(f, "FAILED: {}", reason),
            Outcome::TransientFailure(reason) => write!(f, "TRANSIENT: {}", reason),
        }
    }
}

/// Per-run counters, one bucket per terminal state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub success: u64,
    pub cooldown: u64,
    pub failed: u64,
    pub auth_failed: u64,
    pub cancelled: u64,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.success + self.cooldown + self.failed + self.auth_failed + self.cancelled
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.success += other.success;
        self.cooldown += other.cooldown;
        self.failed += other.failed;
        self.auth_failed += other.auth_failed;
        self.cancelled += other.cancelled;
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub tx_hash: Option<String>,
}

#[async_trait]
pub trait Task<Ctx>: Send + Sync {
    /// Returns the name of the task
    fn name(&self) -> &str;

    /// Executes the task
    async fn run(&self, ctx: Ctx) -> Result<TaskResult>;
}
