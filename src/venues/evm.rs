use alloy::network::EthereumWallet;
use alloy::primitives::{Address, address};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{Context, Result};

use crate::model::Chain;

// ── ERC20 contract interface ───────────────────────────────────────

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

// ── Token address registry ─────────────────────────────────────────

/// Underlying token address for `(chain, symbol)`. `None` for unknown pairs.
pub fn token_address(chain: Chain, symbol: &str) -> Option<Address> {
    let addr = match (chain, symbol.to_uppercase().as_str()) {
        (Chain::Ethereum, "USDC") => address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        (Chain::Ethereum, "USDT") => address!("dAC17F958D2ee523a2206206994597C13D831ec7"),

        (Chain::Arbitrum, "USDC") => address!("af88d065e77c8cC2239327C5EDb3A432268e5831"),
        (Chain::Arbitrum, "USDT") => address!("Fd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),

        (Chain::Polygon, "USDC") => address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        (Chain::Polygon, "USDT") => address!("c2132D05D31c914a87C6611C10748AEb04B58e8F"),

        (Chain::Optimism, "USDC") => address!("0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
        (Chain::Optimism, "USDT") => address!("94b008aA00579c1307B0EF2c499aD98a8ce58e58"),

        _ => return None,
    };
    Some(addr)
}

/// CAIP-19 asset id, e.g. `eip155:42161/erc20:0xaf88...`.
pub fn asset_type(chain: Chain, token: Address) -> String {
    format!("{}/erc20:{}", chain.caip2(), alloy::hex::encode_prefixed(token))
}

// ── Known contract addresses ───────────────────────────────────────

/// Aave V3 pool by chain.
pub fn aave_pool_address(chain: Chain) -> Address {
    match chain {
        Chain::Ethereum => address!("87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"),
        Chain::Arbitrum | Chain::Polygon | Chain::Optimism => {
            address!("794a61358D6845594F94dc1DB02A252b5b4814aD")
        }
    }
}

/// Token vaults deployed on Arbitrum.
pub fn default_vaults() -> Vec<(&'static str, Address)> {
    vec![
        ("USDC", address!("c433DC0586EA17eDFA4B9Ea2987B3eAf177B50F4")),
        ("USDT", address!("152Cf498fA14dB52D3e6797066C7D528e8023535")),
    ]
}

// ── Provider factory ───────────────────────────────────────────────

pub fn read_provider(rpc_url: &str) -> Result<impl Provider + Clone> {
    let url = rpc_url
        .parse()
        .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    Ok(ProviderBuilder::new().connect_http(url))
}

pub fn signing_provider(signer: PrivateKeySigner, rpc_url: &str) -> Result<impl Provider + Clone> {
    let url = rpc_url
        .parse()
        .with_context(|| format!("invalid RPC URL {rpc_url}"))?;
    let wallet = EthereumWallet::from(signer);
    Ok(ProviderBuilder::new().wallet(wallet).connect_http(url))
}

pub fn require_success(receipt: &alloy::rpc::types::TransactionReceipt, label: &str) -> Result<()> {
    if !receipt.status() {
        anyhow::bail!(
            "{} tx reverted (hash: {:?}, gas_used: {:?})",
            label,
            receipt.transaction_hash,
            receipt.gas_used,
        );
    }
    Ok(())
}

// ── Utility functions ──────────────────────────────────────────────

pub fn short_addr(addr: &Address) -> String {
    let s = format!("{addr}");
    if s.len() > 10 {
        format!("{}...{}", &s[..6], &s[s.len() - 4..])
    } else {
        s
    }
}
