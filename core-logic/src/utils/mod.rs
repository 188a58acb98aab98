//! # Utilities Module
//!
//! Internal utility modules for the core-logic crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

pub(crate) mod cooldown;
pub(crate) mod limiter;
pub(crate) mod logger;
pub(crate) mod proxy_manager;
pub(crate) mod result_log;
pub(crate) mod retry;
pub(crate) mod runner;
pub(crate) mod wallet_manager;

// Selective exports - only public utilities
pub use cooldown::CooldownStore;
pub use limiter::{ConcurrencyLimiter, LimiterConfig, OperationClass};
pub use logger::{setup_logger, setup_quiet_logger, LoggerConfig};
pub use proxy_manager::ProxyManager;
pub use result_log::{ResultKind, ResultLog};
pub use runner::WorkerRunner;
pub use wallet_manager::{RawKey, WalletManager};
