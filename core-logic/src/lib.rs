//! # Core Logic - Shared Orchestration Primitives
//!
//! Chain-agnostic building blocks for driving many wallet identities through
//! rate-limited remote workflows.
//!
//! ## Modules
//!
//! - [`config`] - Proxy configuration and identity-to-proxy binding
//! - [`error`] - Typed error handling with thiserror
//! - [`traits`] - Outcome, run counters and the `Task` trait
//! - `utils` - Retry policy, concurrency limiter, cooldown store, result log,
//!   logger, key/proxy loading

pub mod config;
pub mod error;
pub mod traits;
pub(crate) mod utils;

pub use config::{ProxyAssignment, ProxyConfig};
pub use error::{ConfigError, CoreError, NetworkError, RetryError, WalletError};
pub use traits::{Outcome, RunStats, Task, TaskResult};

pub use utils::{
    setup_logger, setup_quiet_logger, ConcurrencyLimiter, CooldownStore, LimiterConfig,
    LoggerConfig, OperationClass, ProxyManager, RawKey, ResultKind, ResultLog, WalletManager,
    WorkerRunner,
};

// Retry utilities are used directly by chain crates and integration tests
pub use utils::retry::{
    classify_error, classify_error_message, sleep_or_cancel, with_policy, Attempt, FailureClass,
    RetryDecision, RetryPolicy,
};
