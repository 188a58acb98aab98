use super::wrap::{fraction_of, wrap_native};
use super::{
    approve_if_needed, ensure_gas, format_amount, submit, to_base_units, token_balance,
    token_decimals, ChainContext, Erc20,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::{Task, TaskResult};
use ethers::prelude::*;
use rand::Rng;
use std::sync::Arc;

const ROUTER_ABI: &str = r#"[
    {"type":"function","name":"multicall","stateMutability":"payable",
     "inputs":[{"name":"deadline","type":"uint256"},{"name":"data","type":"bytes[]"}],
     "outputs":[{"name":"results","type":"bytes[]"}]},
    {"type":"function","name":"exactInputSingle","stateMutability":"payable",
     "inputs":[{"name":"params","type":"tuple","components":[
        {"name":"tokenIn","type":"address"},
        {"name":"tokenOut","type":"address"},
        {"name":"fee","type":"uint24"},
        {"name":"recipient","type":"address"},
        {"name":"amountIn","type":"uint256"},
        {"name":"amountOutMinimum","type":"uint256"},
        {"name":"sqrtPriceLimitX96","type":"uint160"}]}],
     "outputs":[{"name":"amountOut","type":"uint256"}]}
]"#;

/// Amount window for one direction of the swap, in whole tokens.
#[derive(Debug, Clone, Copy)]
pub struct SwapRange {
    pub min: f64,
    pub max: f64,
}

impl SwapRange {
    /// Picks `min + (max - min) * p` with `p` uniform in `[0.2, 1.0)`.
    pub fn pick(&self) -> f64 {
        let p: f64 = rand::thread_rng().gen_range(0.2..1.0);
        self.min + (self.max - self.min) * p
    }
}

/// Single-hop exact-input swap between WPHRS and USDC through the router's
/// multicall entry point. Direction follows balances.
pub struct SwapTask {
    pub wphrs_to_usdc: SwapRange,
    pub usdc_to_wphrs: SwapRange,
}

impl Default for SwapTask {
    fn default() -> Self {
        Self {
            wphrs_to_usdc: SwapRange {
                min: 0.001,
                max: 0.022,
            },
            usdc_to_wphrs: SwapRange {
                min: 0.0000001,
                max: 0.01,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    WphrsToUsdc,
    UsdcToWphrs,
    /// Neither token is held; the iteration passes without a transaction.
    Nothing,
}

pub fn choose_direction(wphrs: U256, usdc: U256, threshold: U256) -> SwapDirection {
    if wphrs > threshold {
        SwapDirection::WphrsToUsdc
    } else if !usdc.is_zero() {
        SwapDirection::UsdcToWphrs
    } else {
        SwapDirection::Nothing
    }
}

/// Which stable to sell when rebalancing, `true` for USDC -> USDT. `None` when
/// neither side is large enough to draw from.
pub fn rebalance_direction(
    usdc: U256,
    usdt: U256,
    above_usdc: U256,
    above_usdt: U256,
    source_min: U256,
    coin: bool,
) -> Option<bool> {
    if usdc <= above_usdc && usdt <= above_usdt {
        return None;
    }
    if usdc > source_min && usdt > above_usdt {
        Some(coin)
    } else {
        Some(usdc > source_min)
    }
}

fn no_tx(success: bool, message: String) -> TaskResult {
    TaskResult {
        success,
        message,
        tx_hash: None,
    }
}

/// Sends `router.multicall(deadline, [exactInputSingle(...)])`, with `value`
/// attached when the input is paid in native PHRS.
pub(crate) async fn exact_input_single(
    ctx: &ChainContext,
    token_in: Address,
    token_out: Address,
    amount: U256,
    value: Option<U256>,
    what: &str,
) -> Result<TransactionReceipt> {
    let router_addr = ctx.token("swap router", &ctx.chain.swap_router)?;
    let abi: abi::Abi = serde_json::from_str(ROUTER_ABI)?;
    let router = Contract::new(router_addr, abi, Arc::clone(&ctx.client));
    let params = (
        token_in,
        token_out,
        ctx.chain.swap_fee,
        ctx.address,
        amount,
        U256::zero(),
        U256::zero(),
    );
    let inner = router
        .encode("exactInputSingle", (params,))
        .context("Failed to encode exactInputSingle")?;
    let data = router.encode("multicall", (ctx.deadline(600), vec![inner]))?;

    let mut tx = TransactionRequest::new().to(router_addr).data(data);
    if let Some(value) = value {
        tx = tx.value(value);
    }
    submit(ctx, tx, what).await
}

/// Buys USDC with `amount` wei of native PHRS.
pub(crate) async fn convert_native_to_usdc(ctx: &ChainContext, amount: U256) -> Result<()> {
    tracing::info!(
        target: "task_result",
        "{} Converting {} PHRS to USDC",
        ctx.prefix,
        format_amount(amount, 18)
    );
    let (wphrs, usdc) = (ctx.wphrs()?, ctx.usdc()?);
    exact_input_single(ctx, wphrs, usdc, amount, Some(amount), "PHRS -> USDC").await?;
    Ok(())
}

/// Makes sure `amount` USDC is held, buying it with native PHRS when short.
/// Returns the failure to report when even that is not enough.
pub(crate) async fn ensure_usdc(
    ctx: &ChainContext,
    usdc: &Erc20,
    amount: U256,
    decimals: u8,
) -> Result<Option<TaskResult>> {
    let balance = token_balance(usdc, ctx.address).await?;
    if balance >= amount {
        return Ok(None);
    }

    let native = ctx
        .client
        .get_balance(ctx.address, None)
        .await
        .context("Failed to get native balance")?;
    let spend = to_base_units(ctx.chain.usdc_top_up_native, 18);
    let reserve = to_base_units(ctx.chain.min_gas_balance, 18);
    if native < spend + reserve {
        return Ok(Some(no_tx(
            false,
            format!(
                "Insufficient USDC: {} < {}, no PHRS to convert",
                format_amount(balance, decimals),
                format_amount(amount, decimals)
            ),
        )));
    }
    convert_native_to_usdc(ctx, spend).await?;

    let balance = token_balance(usdc, ctx.address).await?;
    if balance < amount {
        return Ok(Some(no_tx(
            false,
            format!(
                "Insufficient USDC after conversion: {} < {}",
                format_amount(balance, decimals),
                format_amount(amount, decimals)
            ),
        )));
    }
    Ok(None)
}

impl SwapTask {
    /// Moves 20-30% of a large USDC or USDT balance to the other stable.
    async fn rebalance(&self, ctx: &ChainContext, rebalance: Rebalance) -> Result<TaskResult> {
        let r = &rebalance;
        let (from, to, balance, decimals, from_symbol, to_symbol) = if r.usdc_to_usdt {
            (&r.usdc, &r.usdt, r.usdc_balance, r.usdc_decimals, "USDC", "USDT")
        } else {
            (&r.usdt, &r.usdc, r.usdt_balance, r.usdt_decimals, "USDT", "USDC")
        };
        let permille = rand::thread_rng().gen_range(200u64..=300);
        let amount = fraction_of(balance, permille);
        if amount.is_zero() {
            return Ok(no_tx(
                true,
                format!("{} balance too small to rebalance", from_symbol),
            ));
        }

        let router_addr = ctx.token("swap router", &ctx.chain.swap_router)?;
        approve_if_needed(ctx, from, router_addr, amount, from_symbol).await?;
        let receipt = exact_input_single(
            ctx,
            from.address(),
            to.address(),
            amount,
            None,
            "rebalance",
        )
        .await?;

        Ok(TaskResult {
            success: true,
            message: format!(
                "Rebalanced {} {} -> {}",
                format_amount(amount, decimals),
                from_symbol,
                to_symbol
            ),
            tx_hash: Some(format!("{:?}", receipt.transaction_hash)),
        })
    }

    /// Rolls for a stable rebalance; `None` means swap as usual.
    async fn plan_rebalance(
        &self,
        ctx: &ChainContext,
        usdc: &Erc20,
    ) -> Result<Option<Rebalance>> {
        let (roll, coin) = {
            let mut rng = rand::thread_rng();
            (rng.gen::<f64>(), rng.gen::<bool>())
        };
        if roll >= ctx.chain.rebalance_chance {
            return Ok(None);
        }

        let usdt = ctx.erc20(ctx.token("USDT", &ctx.chain.usdt)?)?;
        let usdc_decimals = token_decimals(usdc).await?;
        let usdt_decimals = token_decimals(&usdt).await?;
        let usdc_balance = token_balance(usdc, ctx.address).await?;
        let usdt_balance = token_balance(&usdt, ctx.address).await?;

        let direction = rebalance_direction(
            usdc_balance,
            usdt_balance,
            to_base_units(ctx.chain.rebalance_above, usdc_decimals),
            to_base_units(ctx.chain.rebalance_above, usdt_decimals),
            to_base_units(ctx.chain.rebalance_source_min, usdc_decimals),
            coin,
        );
        Ok(direction.map(|usdc_to_usdt| Rebalance {
            usdc: usdc.clone(),
            usdt,
            usdc_balance,
            usdt_balance,
            usdc_decimals,
            usdt_decimals,
            usdc_to_usdt,
        }))
    }
}

struct Rebalance {
    usdc: Erc20,
    usdt: Erc20,
    usdc_balance: U256,
    usdt_balance: U256,
    usdc_decimals: u8,
    usdt_decimals: u8,
    usdc_to_usdt: bool,
}

#[async_trait]
impl Task<ChainContext> for SwapTask {
    fn name(&self) -> &str {
        "swap"
    }

    async fn run(&self, ctx: ChainContext) -> Result<TaskResult> {
        if let Some(short) = ensure_gas(&ctx).await? {
            return Ok(short);
        }

        let wphrs_addr = ctx.wphrs()?;
        let usdc_addr = ctx.usdc()?;
        let router_addr = ctx.token("swap router", &ctx.chain.swap_router)?;
        let wphrs = ctx.erc20(wphrs_addr)?;
        let usdc = ctx.erc20(usdc_addr)?;

        if let Some(rebalance) = self.plan_rebalance(&ctx, &usdc).await? {
            return self.rebalance(&ctx, rebalance).await;
        }

        let wphrs_decimals = token_decimals(&wphrs).await?;
        let usdc_decimals = token_decimals(&usdc).await?;
        let wphrs_balance = token_balance(&wphrs, ctx.address).await?;
        let usdc_balance = token_balance(&usdc, ctx.address).await?;
        let threshold = to_base_units(ctx.chain.wphrs_swap_threshold, wphrs_decimals);

        let direction = choose_direction(wphrs_balance, usdc_balance, threshold);
        let (token_in, token_out, decimals, amount, symbol_in, symbol_out) = match direction {
            SwapDirection::WphrsToUsdc => (
                &wphrs,
                usdc_addr,
                wphrs_decimals,
                to_base_units(self.wphrs_to_usdc.pick(), wphrs_decimals),
                "WPHRS",
                "USDC",
            ),
            SwapDirection::UsdcToWphrs => (
                &usdc,
                wphrs_addr,
                usdc_decimals,
                to_base_units(self.usdc_to_wphrs.pick(), usdc_decimals),
                "USDC",
                "WPHRS",
            ),
            SwapDirection::Nothing => {
                return Ok(no_tx(true, "No WPHRS or USDC to swap".to_string()));
            }
        };

        if amount.is_zero() {
            return Ok(no_tx(
                true,
                format!("Swap amount rounds to zero {}", symbol_in),
            ));
        }

        match direction {
            SwapDirection::WphrsToUsdc if wphrs_balance < amount => {
                wrap_native(&ctx, amount - wphrs_balance).await?;
            }
            SwapDirection::UsdcToWphrs => {
                if let Some(short) = ensure_usdc(&ctx, &usdc, amount, usdc_decimals).await? {
                    return Ok(short);
                }
            }
            _ => {}
        }

        approve_if_needed(&ctx, token_in, router_addr, amount, symbol_in).await?;
        let receipt =
            exact_input_single(&ctx, token_in.address(), token_out, amount, None, "swap").await?;

        Ok(TaskResult {
            success: true,
            message: format!(
                "Swapped {} {} -> {}",
                format_amount(amount, decimals),
                symbol_in,
                symbol_out
            ),
            tx_hash: Some(format!("{:?}", receipt.transaction_hash)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_follows_balances() {
        let threshold = U256::from(10u64);
        assert_eq!(
            choose_direction(U256::from(11u64), U256::zero(), threshold),
            SwapDirection::WphrsToUsdc
        );
        assert_eq!(
            choose_direction(U256::from(10u64), U256::from(1u64), threshold),
            SwapDirection::UsdcToWphrs
        );
        assert_eq!(
            choose_direction(U256::zero(), U256::zero(), threshold),
            SwapDirection::Nothing
        );
    }

    #[test]
    fn test_rebalance_direction() {
        let above = U256::from(50u64);
        let min = U256::from(20u64);
        let d = |usdc: u64, usdt: u64, coin| {
            rebalance_direction(U256::from(usdc), U256::from(usdt), above, above, min, coin)
        };
        // Neither side large.
        assert_eq!(d(50, 50, true), None);
        // Only USDC large.
        assert_eq!(d(60, 0, false), Some(true));
        // Only USDT large and too little USDC to draw from.
        assert_eq!(d(10, 60, true), Some(false));
        // Both usable: the coin decides.
        assert_eq!(d(30, 60, true), Some(true));
        assert_eq!(d(30, 60, false), Some(false));
    }

    #[test]
    fn test_swap_range_pick_bounds() {
        let range = SwapRange {
            min: 0.001,
            max: 0.022,
        };
        for _ in 0..100 {
            let v = range.pick();
            assert!(v >= 0.001 + 0.021 * 0.2 - 1e-12);
            assert!(v < 0.022);
        }
    }

    #[test]
    fn test_router_abi_encodes_multicall() {
        let abi: abi::Abi = serde_json::from_str(ROUTER_ABI).unwrap();
        let f = abi.function("exactInputSingle").unwrap();
        assert_eq!(f.inputs.len(), 1);
        assert!(abi.function("multicall").is_ok());
    }
}
