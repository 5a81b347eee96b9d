use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::{Amount, Chain};
use crate::venues::evm::{self, IERC20};
use crate::venues::{LendingPosition, PositionReader};

// ── Aave V3 Pool interface ──────────────────────────────────────────

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IAavePool {
        function supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;
        function withdraw(address asset, uint256 amount, address to) external returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IAavePoolRead {
        function getReserveData(address asset) external view returns (
            uint256, uint128, uint128, uint128, uint128, uint128,
            uint40, uint16, address, address, address, address,
            uint128, uint128, uint128
        );
    }
}

const RAY: f64 = 1e27;
const SECONDS_PER_YEAR: f64 = 31_536_000.0;

// ── Calldata ─────────────────────────────────────────────────────────

/// `supply(asset, amount, onBehalfOf, 0)`.
pub fn encode_supply(asset: Address, amount: Amount, on_behalf_of: Address) -> Bytes {
    IAavePool::supplyCall {
        asset,
        amount: amount.units(),
        onBehalfOf: on_behalf_of,
        referralCode: 0,
    }
    .abi_encode()
    .into()
}

/// `withdraw(asset, amount, to)`.
pub fn encode_withdraw(asset: Address, amount: Amount, to: Address) -> Bytes {
    IAavePool::withdrawCall {
        asset,
        amount: amount.units(),
        to,
    }
    .abi_encode()
    .into()
}

/// Convert a reserve's `currentLiquidityRate` (APR in ray) to APY percent,
/// compounding per second.
pub fn reserve_rate_to_apy(liquidity_rate: u128) -> f64 {
    let apr = liquidity_rate as f64 / RAY;
    ((1.0 + apr / SECONDS_PER_YEAR).powf(SECONDS_PER_YEAR) - 1.0) * 100.0
}

// ── Reserve reads ────────────────────────────────────────────────────

pub struct ReserveSnapshot {
    pub liquidity_rate: u128,
    pub a_token: Address,
}

pub async fn read_reserve(chain: Chain, asset: Address) -> Result<ReserveSnapshot> {
    let rp = evm::read_provider(chain.rpc_url())?;
    let pool = IAavePoolRead::new(evm::aave_pool_address(chain), &rp);
    let reserve_data = pool
        .getReserveData(asset)
        .call()
        .await
        .with_context(|| format!("getReserveData on {chain}"))?;
    Ok(ReserveSnapshot {
        liquidity_rate: reserve_data._2,
        a_token: reserve_data._8,
    })
}

// ── Position reader ──────────────────────────────────────────────────

/// aToken balances of one account across the configured market chains.
pub struct AavePositions {
    markets: Vec<Chain>,
    account: Address,
}

impl AavePositions {
    pub fn new(markets: Vec<Chain>, account: Address) -> Self {
        AavePositions { markets, account }
    }

    async fn position_on(&self, chain: Chain, asset: Address) -> Result<U256> {
        let reserve = read_reserve(chain, asset).await?;
        let rp = evm::read_provider(chain.rpc_url())?;
        let a_token = IERC20::new(reserve.a_token, &rp);
        a_token
            .balanceOf(self.account)
            .call()
            .await
            .with_context(|| format!("aToken.balanceOf on {chain}"))
    }
}

#[async_trait]
impl PositionReader for AavePositions {
    async fn positions(&self, token: &str) -> Result<Vec<LendingPosition>> {
        let mut positions = Vec::new();
        for &chain in &self.markets {
            let Some(asset) = evm::token_address(chain, token) else {
                warn!(token, %chain, "no token address, skipping market");
                continue;
            };
            let balance = self.position_on(chain, asset).await?;
            debug!(token, %chain, balance = %balance, "aave position");
            if !balance.is_zero() {
                positions.push(LendingPosition {
                    chain,
                    amount: Amount::new(balance),
                });
            }
        }
        Ok(positions)
    }
}
