use super::{format_amount, submit, to_base_units, token_balance, ChainContext};
use anyhow::Result;
use async_trait::async_trait;
use core_logic::{Task, TaskResult};
use ethers::prelude::*;
use rand::Rng;

/// Deposits `amount` wei of native PHRS into the WPHRS contract.
pub(crate) async fn wrap_native(ctx: &ChainContext, amount: U256) -> Result<TransactionReceipt> {
    let wphrs = ctx.wphrs()?;
    let token = ctx.erc20(wphrs)?;
    let data = token.encode("deposit", ())?;
    let tx = TransactionRequest::new().to(wphrs).data(data).value(amount);
    submit(ctx, tx, "wrap").await
}

/// Withdraws `amount` wei of WPHRS back to native PHRS.
pub(crate) async fn unwrap_wphrs(ctx: &ChainContext, amount: U256) -> Result<TransactionReceipt> {
    let wphrs = ctx.wphrs()?;
    let token = ctx.erc20(wphrs)?;
    let data = token.encode("withdraw", amount)?;
    let tx = TransactionRequest::new().to(wphrs).data(data);
    submit(ctx, tx, "unwrap").await
}

/// `balance * permille / 1000`.
pub fn fraction_of(balance: U256, permille: u64) -> U256 {
    balance * U256::from(permille) / U256::from(1000u64)
}

/// How much WPHRS to unwrap, if any: only above `above`, only when `roll`
/// lands under `chance`.
pub fn plan_unwrap(balance: U256, above: U256, roll: f64, chance: f64, permille: u64) -> Option<U256> {
    if balance <= above || roll >= chance {
        return None;
    }
    Some(fraction_of(balance, permille)).filter(|amount| !amount.is_zero())
}

/// Occasionally turns part of a large WPHRS balance back into native PHRS.
/// Runs after successful iterations; a no-op result is not a failure.
#[derive(Debug, Clone)]
pub struct UnwrapTask {
    pub min_permille: u64,
    pub max_permille: u64,
}

impl Default for UnwrapTask {
    fn default() -> Self {
        Self {
            min_permille: 200,
            max_permille: 300,
        }
    }
}

#[async_trait]
impl Task<ChainContext> for UnwrapTask {
    fn name(&self) -> &str {
        "unwrap"
    }

    async fn run(&self, ctx: ChainContext) -> Result<TaskResult> {
        let wphrs = ctx.erc20(ctx.wphrs()?)?;
        let balance = token_balance(&wphrs, ctx.address).await?;
        let above = to_base_units(ctx.chain.unwrap_above, 18);

        let (roll, permille) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen::<f64>(),
                rng.gen_range(self.min_permille..=self.max_permille.max(self.min_permille)),
            )
        };
        let Some(amount) = plan_unwrap(balance, above, roll, ctx.chain.unwrap_chance, permille)
        else {
            return Ok(TaskResult {
                success: false,
                message: "No unwrap this round".to_string(),
                tx_hash: None,
            });
        };

        let receipt = unwrap_wphrs(&ctx, amount).await?;
        Ok(TaskResult {
            success: true,
            message: format!("Unwrapped {} WPHRS to PHRS", format_amount(amount, 18)),
            tx_hash: Some(format!("{:?}", receipt.transaction_hash)),
        })
    }
}
