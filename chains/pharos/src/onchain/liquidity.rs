use super::swap::ensure_usdc;
use super::wrap::wrap_native;
use super::{
    approve_if_needed, ensure_gas, format_amount, submit, to_base_units, token_balance,
    token_decimals, ChainContext,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::{Task, TaskResult};
use ethers::prelude::*;
use rand::Rng;
use std::sync::Arc;

const POSITION_MANAGER_ABI: &str = r#"[
    {"type":"function","name":"mint","stateMutability":"payable",
     "inputs":[{"name":"params","type":"tuple","components":[
        {"name":"token0","type":"address"},
        {"name":"token1","type":"address"},
        {"name":"fee","type":"uint24"},
        {"name":"tickLower","type":"int24"},
        {"name":"tickUpper","type":"int24"},
        {"name":"amount0Desired","type":"uint256"},
        {"name":"amount1Desired","type":"uint256"},
        {"name":"amount0Min","type":"uint256"},
        {"name":"amount1Min","type":"uint256"},
        {"name":"recipient","type":"address"},
        {"name":"deadline","type":"uint256"}]}],
     "outputs":[
        {"name":"tokenId","type":"uint256"},
        {"name":"liquidity","type":"uint128"},
        {"name":"amount0","type":"uint256"},
        {"name":"amount1","type":"uint256"}]}
]"#;

const MAX_TICK: i32 = 887_272;

/// Tick spacing used by the pool factory for each fee tier.
pub fn tick_spacing(fee: u32) -> i32 {
    match fee {
        100 => 1,
        500 => 10,
        3000 => 60,
        10_000 => 200,
        _ => 60,
    }
}

/// Widest tick range aligned to the fee tier's spacing.
pub fn full_range_ticks(fee: u32) -> (i32, i32) {
    let spacing = tick_spacing(fee);
    let upper = (MAX_TICK / spacing) * spacing;
    (-upper, upper)
}

/// Full-range WPHRS/USDC position minted through the position manager.
pub struct AddLiquidityTask {
    pub wphrs_base: f64,
    pub usdc_base: f64,
}

impl Default for AddLiquidityTask {
    fn default() -> Self {
        Self {
            wphrs_base: 0.001,
            usdc_base: 0.01,
        }
    }
}

impl AddLiquidityTask {
    fn jitter(base: f64) -> f64 {
        base * rand::thread_rng().gen_range(0.8..1.1)
    }
}

#[async_trait]
impl Task<ChainContext> for AddLiquidityTask {
    fn name(&self) -> &str {
        "add_liquidity"
    }

    async fn run(&self, ctx: ChainContext) -> Result<TaskResult> {
        if let Some(short) = ensure_gas(&ctx).await? {
            return Ok(short);
        }

        let wphrs_addr = ctx.wphrs()?;
        let usdc_addr = ctx.usdc()?;
        let manager_addr = ctx.token("position manager", &ctx.chain.position_manager)?;
        let wphrs = ctx.erc20(wphrs_addr)?;
        let usdc = ctx.erc20(usdc_addr)?;

        let wphrs_decimals = token_decimals(&wphrs).await?;
        let usdc_decimals = token_decimals(&usdc).await?;
        let wphrs_amount = to_base_units(Self::jitter(self.wphrs_base), wphrs_decimals);
        let usdc_amount = to_base_units(Self::jitter(self.usdc_base), usdc_decimals);

        let wphrs_balance = token_balance(&wphrs, ctx.address).await?;
        if wphrs_balance < wphrs_amount {
            wrap_native(&ctx, wphrs_amount - wphrs_balance).await?;
        }

        if let Some(short) = ensure_usdc(&ctx, &usdc, usdc_amount, usdc_decimals).await? {
            return Ok(short);
        }

        approve_if_needed(&ctx, &wphrs, manager_addr, wphrs_amount, "WPHRS").await?;
        approve_if_needed(&ctx, &usdc, manager_addr, usdc_amount, "USDC").await?;

        // The pool orders its tokens by address.
        let ((token0, amount0), (token1, amount1)) = if wphrs_addr < usdc_addr {
            ((wphrs_addr, wphrs_amount), (usdc_addr, usdc_amount))
        } else {
            ((usdc_addr, usdc_amount), (wphrs_addr, wphrs_amount))
        };
        let (tick_lower, tick_upper) = full_range_ticks(ctx.chain.liquidity_fee);

        let abi: abi::Abi = serde_json::from_str(POSITION_MANAGER_ABI)?;
        let manager = Contract::new(manager_addr, abi, Arc::clone(&ctx.client));
        let params = (
            token0,
            token1,
            ctx.chain.liquidity_fee,
            tick_lower,
            tick_upper,
            amount0,
            amount1,
            U256::zero(),
            U256::zero(),
            ctx.address,
            ctx.deadline(600),
        );
        let data = manager
            .encode("mint", (params,))
            .context("Failed to encode mint")?;

        let tx = TransactionRequest::new().to(manager_addr).data(data);
        let receipt = submit(&ctx, tx, "add liquidity").await?;

        Ok(TaskResult {
            success: true,
            message: format!(
                "Added liquidity {} WPHRS + {} USDC",
                format_amount(wphrs_amount, wphrs_decimals),
                format_amount(usdc_amount, usdc_decimals)
            ),
            tx_hash: Some(format!("{:?}", receipt.transaction_hash)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range_ticks() {
        assert_eq!(full_range_ticks(500), (-887_270, 887_270));
        assert_eq!(full_range_ticks(3000), (-887_220, 887_220));
        assert_eq!(full_range_ticks(10_000), (-887_200, 887_200));
        assert_eq!(full_range_ticks(100), (-887_272, 887_272));
    }

    #[test]
    fn test_mint_abi_takes_one_tuple() {
        let abi: abi::Abi = serde_json::from_str(POSITION_MANAGER_ABI).unwrap();
        assert_eq!(abi.function("mint").unwrap().inputs.len(), 1);
    }
}
