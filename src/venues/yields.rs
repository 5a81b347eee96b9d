use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{ApyEntry, Chain};
use crate::venues::lending::aave;
use crate::venues::{RetryPolicy, YieldSource, evm, retry};

const AAVE_PROTOCOL: &str = "aave-v3";
const POOLS_URL: &str = "https://yields.llama.fi/pools";

// ── On-chain reserve rates ──────────────────────────────────────────

/// Reads `currentLiquidityRate` from each market's Aave V3 pool.
pub struct AaveReserveYields {
    markets: Vec<Chain>,
    tokens: Vec<String>,
}

impl AaveReserveYields {
    pub fn new(markets: Vec<Chain>, tokens: Vec<String>) -> Self {
        AaveReserveYields { markets, tokens }
    }
}

#[async_trait]
impl YieldSource for AaveReserveYields {
    async fn fetch_apys(&self) -> Result<Vec<ApyEntry>> {
        let mut entries = Vec::new();
        for &chain in &self.markets {
            for token in &self.tokens {
                let Some(asset) = evm::token_address(chain, token) else {
                    continue;
                };
                match aave::read_reserve(chain, asset).await {
                    Ok(reserve) => entries.push(ApyEntry {
                        protocol: AAVE_PROTOCOL.to_string(),
                        chain,
                        token_symbol: token.clone(),
                        apy: aave::reserve_rate_to_apy(reserve.liquidity_rate),
                    }),
                    Err(e) => warn!(token = %token, %chain, error = %format!("{e:#}"), "reserve read failed"),
                }
            }
        }
        if entries.is_empty() {
            anyhow::bail!("no Aave reserve could be read");
        }
        Ok(entries)
    }
}

// ── DefiLlama ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    data: Vec<Pool>,
}

#[derive(Debug, Deserialize)]
struct Pool {
    chain: Option<String>,
    project: String,
    symbol: String,
    #[serde(rename = "tvlUsd")]
    tvl_usd: Option<f64>,
    apy: Option<f64>,
}

/// Aave V3 supply APYs from the DefiLlama yields API.
pub struct DefiLlamaYields {
    client: reqwest::Client,
    markets: Vec<Chain>,
    tokens: Vec<String>,
}

impl DefiLlamaYields {
    pub fn new(markets: Vec<Chain>, tokens: Vec<String>) -> Self {
        DefiLlamaYields {
            client: reqwest::Client::new(),
            markets,
            tokens,
        }
    }
}

#[async_trait]
impl YieldSource for DefiLlamaYields {
    async fn fetch_apys(&self) -> Result<Vec<ApyEntry>> {
        let resp = retry(RetryPolicy::default(), || {
            let client = self.client.clone();
            async move {
                let r = client
                    .get(POOLS_URL)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<PoolsResponse>()
                    .await?;
                Ok::<_, anyhow::Error>(r)
            }
        })
        .await
        .context("fetching DefiLlama pools")?;

        Ok(aave_entries(&resp.data, &self.markets, &self.tokens))
    }
}

/// The largest-TVL Aave V3 pool per `(chain, token)`, in market then token order.
fn aave_entries(pools: &[Pool], markets: &[Chain], tokens: &[String]) -> Vec<ApyEntry> {
    let mut best: BTreeMap<(usize, usize), (&Pool, f64)> = BTreeMap::new();

    for pool in pools.iter().filter(|p| p.project == AAVE_PROTOCOL) {
        let Some(apy) = pool.apy else { continue };
        let Some(chain) = pool.chain.as_deref().and_then(|c| c.parse::<Chain>().ok()) else {
            continue;
        };
        let Some(m) = markets.iter().position(|&c| c == chain) else {
            continue;
        };
        let Some(t) = tokens.iter().position(|t| t.eq_ignore_ascii_case(&pool.symbol)) else {
            continue;
        };
        let tvl = pool.tvl_usd.unwrap_or(0.0);
        match best.get(&(m, t)) {
            Some((current, _)) if current.tvl_usd.unwrap_or(0.0) >= tvl => {}
            _ => {
                best.insert((m, t), (pool, apy));
            }
        }
    }

    best.into_iter()
        .map(|((m, t), (_, apy))| {
            debug!(token = %tokens[t], chain = %markets[m], apy, "defillama yield");
            ApyEntry {
                protocol: AAVE_PROTOCOL.to_string(),
                chain: markets[m],
                token_symbol: tokens[t].clone(),
                apy,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aave_entries_filter_and_pick_largest_pool() {
        let json = r#"{"data": [
            {"chain": "Arbitrum", "project": "aave-v3", "symbol": "USDC", "tvlUsd": 100.0, "apy": 4.0},
            {"chain": "Arbitrum", "project": "aave-v3", "symbol": "USDC", "tvlUsd": 900.0, "apy": 3.5},
            {"chain": "Arbitrum", "project": "compound-v3", "symbol": "USDC", "tvlUsd": 5000.0, "apy": 9.0},
            {"chain": "Polygon", "project": "aave-v3", "symbol": "USDT", "tvlUsd": 50.0, "apy": 6.1},
            {"chain": "Base", "project": "aave-v3", "symbol": "USDC", "tvlUsd": 50.0, "apy": 8.0},
            {"chain": "Optimism", "project": "aave-v3", "symbol": "WETH", "tvlUsd": 50.0, "apy": 1.0},
            {"chain": "Optimism", "project": "aave-v3", "symbol": "USDC", "tvlUsd": 10.0, "apy": null}
        ]}"#;
        let resp: PoolsResponse = serde_json::from_str(json).unwrap();
        let markets = vec![Chain::Polygon, Chain::Arbitrum, Chain::Optimism];
        let tokens = vec!["USDC".to_string(), "USDT".to_string()];

        let entries = aave_entries(&resp.data, &markets, &tokens);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].chain, Chain::Polygon);
        assert_eq!(entries[0].token_symbol, "USDT");
        assert_eq!(entries[0].apy, 6.1);
        assert_eq!(entries[1].chain, Chain::Arbitrum);
        assert_eq!(entries[1].apy, 3.5);
        assert!(entries.iter().all(|e| e.protocol == "aave-v3"));
    }
}
