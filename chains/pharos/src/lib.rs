//! # Pharos testnet automation
//!
//! Daily faucet claims and WPHRS/USDC swap and liquidity activity for a batch
//! of wallets, each bound to a proxy by load position.
//!
//! The faucet path is `login -> status -> claim` against the Pharos API; see
//! [`faucet::FaucetWorkflow`]. On-chain work runs through
//! [`onchain::EvmOnchainRunner`]. [`scheduler::WalletTaskScheduler`] drives
//! both and writes the result logs.

pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod faucet;
pub mod identity;
pub mod onchain;
pub mod scheduler;

pub use client::{HttpTransport, Transport};
pub use config::PharosConfig;
pub use identity::Identity;
pub use scheduler::{RunMode, RunSummary, WalletTaskScheduler};
