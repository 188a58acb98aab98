//! On-chain units of work against the Pharos testnet.
//!
//! Each unit is a [`Task<ChainContext>`]; the iteration loop in
//! [`iterations`] turns their results into [`Outcome`](core_logic::Outcome)s
//! and drives retries.

pub mod iterations;
pub mod liquidity;
pub mod swap;
pub mod wrap;

use crate::client::build_http_client;
use crate::config::ChainConfig;
use crate::identity::Identity;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use core_logic::{ProxyConfig, Task, TaskResult};
use ethers::prelude::*;
use iterations::{ActionPlanner, IterationReport, IterationRunner, IterationSettings};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use liquidity::AddLiquidityTask;
pub use swap::SwapTask;
pub use wrap::UnwrapTask;

pub type PharosClient = SignerMiddleware<Provider<Http>, LocalWallet>;
pub type Erc20 = Contract<PharosClient>;

pub(crate) const ERC20_ABI: &str = r#"[
    {"constant":true,"inputs":[{"name":"_owner","type":"address"}],"name":"balanceOf","outputs":[{"name":"balance","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"decimals","outputs":[{"name":"","type":"uint8"}],"type":"function"},
    {"constant":false,"inputs":[{"name":"_spender","type":"address"},{"name":"_value","type":"uint256"}],"name":"approve","outputs":[{"name":"","type":"bool"}],"type":"function"},
    {"constant":true,"inputs":[{"name":"_owner","type":"address"},{"name":"_spender","type":"address"}],"name":"allowance","outputs":[{"name":"","type":"uint256"}],"type":"function"},
    {"type":"function","name":"deposit","stateMutability":"payable","inputs":[],"outputs":[]},
    {"type":"function","name":"withdraw","stateMutability":"nonpayable","inputs":[{"name":"wad","type":"uint256"}],"outputs":[]}
]"#;

/// Per-identity handle on the chain: signer, addresses and tuning.
#[derive(Clone)]
pub struct ChainContext {
    pub client: Arc<PharosClient>,
    pub address: Address,
    pub chain: Arc<ChainConfig>,
    pub prefix: String,
}

impl ChainContext {
    /// Builds a provider routed through `proxy` and binds the identity's key.
    pub fn connect(
        identity: &Identity,
        proxy: Option<&ProxyConfig>,
        chain: Arc<ChainConfig>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let http_client = build_http_client(proxy, Duration::from_secs(chain.rpc_timeout_secs))?;
        let url = url::Url::parse(&chain.rpc_url).context("Invalid RPC URL")?;
        let provider = Provider::new(Http::new_with_client(url, http_client));
        let wallet = identity.wallet().clone().with_chain_id(chain.chain_id);

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            address: identity.h160(),
            chain,
            prefix: prefix.into(),
        })
    }

    pub fn token(&self, field: &str, value: &str) -> Result<Address> {
        value
            .parse()
            .with_context(|| format!("Invalid {} address: {}", field, value))
    }

    pub fn wphrs(&self) -> Result<Address> {
        self.token("WPHRS", &self.chain.wphrs)
    }

    pub fn usdc(&self) -> Result<Address> {
        self.token("USDC", &self.chain.usdc)
    }

    pub fn erc20(&self, token: Address) -> Result<Contract<PharosClient>> {
        let abi: abi::Abi = serde_json::from_str(ERC20_ABI)?;
        Ok(Contract::new(token, abi, self.client.clone()))
    }

    pub fn deadline(&self, secs_ahead: i64) -> U256 {
        U256::from((chrono::Utc::now().timestamp() + secs_ahead).max(0) as u64)
    }
}

/// Decimal amount to integer base units. Amounts here are small, so f64 is
/// exact enough.
pub fn to_base_units(amount: f64, decimals: u8) -> U256 {
    let scaled = amount * 10f64.powi(decimals as i32);
    if !scaled.is_finite() || scaled <= 0.0 {
        return U256::zero();
    }
    U256::from(scaled as u128)
}

pub fn format_amount(amount: U256, decimals: u8) -> String {
    ethers::utils::format_units(amount, decimals as u32).unwrap_or_else(|_| amount.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasCheck {
    Enough,
    /// Usable but low: unwrap some WPHRS first.
    TopUp,
    TooLow,
}

pub fn check_gas(native: U256, minimum: U256, top_up_below: U256) -> GasCheck {
    if native < minimum {
        GasCheck::TooLow
    } else if native < top_up_below {
        GasCheck::TopUp
    } else {
        GasCheck::Enough
    }
}

fn unit_failed(message: String) -> Option<TaskResult> {
    Some(TaskResult {
        success: false,
        message,
        tx_hash: None,
    })
}

/// Fails the unit permanently when native balance cannot pay for gas. A low
/// balance is topped up from WPHRS when there is enough of it.
pub(crate) async fn ensure_gas(ctx: &ChainContext) -> Result<Option<TaskResult>> {
    let balance = ctx
        .client
        .get_balance(ctx.address, None)
        .await
        .context("Failed to get native balance")?;
    let minimum = to_base_units(ctx.chain.min_gas_balance, 18);
    let top_up_below = to_base_units(ctx.chain.gas_top_up_below, 18);

    match check_gas(balance, minimum, top_up_below) {
        GasCheck::Enough => Ok(None),
        GasCheck::TooLow => Ok(unit_failed(format!(
            "Insufficient PHRS for gas: {} < {}",
            format_amount(balance, 18),
            ctx.chain.min_gas_balance
        ))),
        GasCheck::TopUp => {
            let wphrs = ctx.erc20(ctx.wphrs()?)?;
            let wphrs_balance = token_balance(&wphrs, ctx.address).await?;
            let amount = to_base_units(ctx.chain.gas_top_up_amount, 18);
            if wphrs_balance < amount {
                return Ok(unit_failed(format!(
                    "PHRS low ({}) and not enough WPHRS to unwrap: {} < {}",
                    format_amount(balance, 18),
                    format_amount(wphrs_balance, 18),
                    ctx.chain.gas_top_up_amount
                )));
            }
            tracing::info!(
                target: "task_result",
                "{} PHRS low ({}), unwrapping {} WPHRS for gas",
                ctx.prefix,
                format_amount(balance, 18),
                ctx.chain.gas_top_up_amount
            );
            wrap::unwrap_wphrs(ctx, amount).await?;
            Ok(None)
        }
    }
}

pub(crate) async fn token_decimals(token: &Contract<PharosClient>) -> Result<u8> {
    token
        .method::<_, u8>("decimals", ())?
        .call()
        .await
        .context("Failed to read token decimals")
}

pub(crate) async fn token_balance(token: &Contract<PharosClient>, owner: Address) -> Result<U256> {
    token
        .method::<_, U256>("balanceOf", owner)?
        .call()
        .await
        .context("Failed to read token balance")
}

/// Failures after a transaction was accepted by the node. Sending it again
/// could land twice, so none of these are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("{what} reverted in {tx_hash:?}")]
    Reverted { what: String, tx_hash: H256 },

    #[error("{what}: {tx_hash:?} dropped from mempool")]
    Dropped { what: String, tx_hash: H256 },

    #[error("{what}: no receipt for {tx_hash:?} within {secs}s")]
    NoReceipt {
        what: String,
        tx_hash: H256,
        secs: u64,
    },

    #[error("{what}: confirming {tx_hash:?} failed: {reason}")]
    Confirmation {
        what: String,
        tx_hash: H256,
        reason: String,
    },
}

/// Sends `tx`, waits for the receipt within the configured window and
/// requires a success status.
pub(crate) async fn submit(
    ctx: &ChainContext,
    tx: TransactionRequest,
    what: &str,
) -> Result<TransactionReceipt> {
    let tx = tx.from(ctx.address);
    let pending = ctx
        .client
        .send_transaction(tx, None)
        .await
        .map_err(|e| anyhow!("{} send failed: {}", what, e))?;
    let tx_hash = pending.tx_hash();

    let secs = ctx.chain.tx_timeout_secs;

    let receipt = tokio::time::timeout(Duration::from_secs(secs), pending)
        .await
        .map_err(|_| TxError::NoReceipt {
            what: what.to_string(),
            tx_hash,
            secs,
        })?
        .map_err(|e| TxError::Confirmation {
            what: what.to_string(),
            tx_hash,
            reason: e.to_string(),
        })?
        .ok_or_else(|| TxError::Dropped {
            what: what.to_string(),
            tx_hash,
        })?;

    if receipt.status != Some(U64::from(1)) {
        return Err(TxError::Reverted {
            what: what.to_string(),
            tx_hash: receipt.transaction_hash,
        }
        .into());
    }
    Ok(receipt)
}

pub(crate) async fn approve_if_needed(
    ctx: &ChainContext,
    token: &Contract<PharosClient>,
    spender: Address,
    amount: U256,
    symbol: &str,
) -> Result<()> {
    let allowance: U256 = token
        .method::<_, U256>("allowance", (ctx.address, spender))?
        .call()
        .await
        .context("Failed to get allowance")?;

    if allowance >= amount {
        return Ok(());
    }

    tracing::debug!("{} Approving {} for {:?}", ctx.prefix, symbol, spender);
    let data = token.encode("approve", (spender, U256::MAX))?;
    let tx = TransactionRequest::new().to(token.address()).data(data);
    submit(ctx, tx, &format!("{} approve", symbol)).await?;
    Ok(())
}

/// Per-identity on-chain loop. A seam so the scheduler can be driven without
/// a live chain.
#[async_trait]
pub trait OnchainRunner: Send + Sync {
    async fn run(
        &self,
        identity: &Identity,
        index: usize,
        proxy: Option<&ProxyConfig>,
        planner: ActionPlanner,
        cancel: &CancellationToken,
    ) -> IterationReport;
}

pub struct EvmOnchainRunner {
    chain: Arc<ChainConfig>,
    settings: IterationSettings,
    swap: Arc<dyn Task<ChainContext>>,
    liquidity: Arc<dyn Task<ChainContext>>,
    unwrap: Arc<dyn Task<ChainContext>>,
}

impl EvmOnchainRunner {
    pub fn new(chain: Arc<ChainConfig>, settings: IterationSettings) -> Self {
        Self {
            chain,
            settings,
            swap: Arc::new(SwapTask::default()),
            liquidity: Arc::new(AddLiquidityTask::default()),
            unwrap: Arc::new(UnwrapTask::default()),
        }
    }
}

#[async_trait]
impl OnchainRunner for EvmOnchainRunner {
    async fn run(
        &self,
        identity: &Identity,
        index: usize,
        proxy: Option<&ProxyConfig>,
        planner: ActionPlanner,
        cancel: &CancellationToken,
    ) -> IterationReport {
        let prefix = format!("[{:03}][{}]", index + 1, identity.short());
        let ctx = match ChainContext::connect(identity, proxy, self.chain.clone(), prefix.as_str()) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(target: "task_result", "{} Provider setup FAILED: {:#}", prefix, e);
                return IterationReport::setup_failed();
            }
        };

        IterationRunner::new(self.settings.clone())
            .with_after_success(self.unwrap.clone())
            .run(
                planner,
                self.swap.clone(),
                self.liquidity.clone(),
                ctx,
                cancel,
                &prefix,
            )
            .await
    }
}
