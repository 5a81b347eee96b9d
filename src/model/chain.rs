use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A lending market chain the bot can place capital on.
///
/// Serialized as the upper-case name (`"ARBITRUM"`), which is also the string
/// written to a vault's `setCurrentAllocation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Ethereum,
    Arbitrum,
    Polygon,
    Optimism,
}

// ── Methods ──────────────────────────────────────────────────────────

impl Chain {
    pub const ALL: [Chain; 4] = [
        Chain::Ethereum,
        Chain::Arbitrum,
        Chain::Polygon,
        Chain::Optimism,
    ];

    /// EVM chain ID.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Arbitrum => 42161,
            Chain::Polygon => 137,
            Chain::Optimism => 10,
        }
    }

    /// CAIP-2 identifier, as used by the balance-aggregation API (`eip155:42161`).
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id())
    }

    pub fn from_caip2(id: &str) -> Option<Chain> {
        let chain_id: u64 = id.strip_prefix("eip155:")?.parse().ok()?;
        Chain::ALL.into_iter().find(|c| c.chain_id() == chain_id)
    }

    /// Default public JSON-RPC endpoint.
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://eth.llamarpc.com",
            Chain::Arbitrum => "https://arb1.arbitrum.io/rpc",
            Chain::Polygon => "https://polygon-rpc.com",
            Chain::Optimism => "https://mainnet.optimism.io",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM",
            Chain::Arbitrum => "ARBITRUM",
            Chain::Polygon => "POLYGON",
            Chain::Optimism => "OPTIMISM",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" | "mainnet" => Ok(Chain::Ethereum),
            "arbitrum" => Ok(Chain::Arbitrum),
            "polygon" => Ok(Chain::Polygon),
            "optimism" => Ok(Chain::Optimism),
            other => Chain::from_caip2(other).ok_or_else(|| {
                format!("unknown chain '{s}' (expected ethereum, arbitrum, polygon or optimism)")
            }),
        }
    }
}
