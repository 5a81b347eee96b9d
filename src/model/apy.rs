use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::chain::Chain;

/// One yield figure from a yield source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApyEntry {
    pub protocol: String,
    pub chain: Chain,
    pub token_symbol: String,
    /// Annual percentage yield, in percent (4.5 = 4.5%).
    pub apy: f64,
}

/// Reduce a yield feed to the best entry per token.
///
/// Output keeps the order in which tokens first appear. On an exact tie the
/// entry seen first wins.
pub fn best_apy_per_token(entries: &[ApyEntry]) -> Vec<ApyEntry> {
    let mut best: Vec<ApyEntry> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for entry in entries {
        match index.get(entry.token_symbol.as_str()) {
            Some(&i) => {
                if best[i].apy < entry.apy {
                    best[i] = entry.clone();
                }
            }
            None => {
                index.insert(&entry.token_symbol, best.len());
                best.push(entry.clone());
            }
        }
    }

    best
}

/// The feed's yield for `token` on `chain`, if it reports one.
pub fn observed_apy(entries: &[ApyEntry], token: &str, chain: Chain) -> Option<f64> {
    entries
        .iter()
        .find(|e| e.token_symbol == token && e.chain == chain)
        .map(|e| e.apy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(protocol: &str, chain: Chain, token: &str, apy: f64) -> ApyEntry {
        ApyEntry {
            protocol: protocol.into(),
            chain,
            token_symbol: token.into(),
            apy,
        }
    }

    #[test]
    fn test_picks_highest_per_token() {
        let feed = vec![
            entry("aave-v3", Chain::Polygon, "USDC", 3.1),
            entry("aave-v3", Chain::Arbitrum, "USDT", 2.0),
            entry("aave-v3", Chain::Optimism, "USDC", 5.4),
            entry("aave-v3", Chain::Arbitrum, "USDC", 4.9),
        ];
        let best = best_apy_per_token(&feed);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].token_symbol, "USDC");
        assert_eq!(best[0].chain, Chain::Optimism);
        assert_eq!(best[1].token_symbol, "USDT");
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let feed = vec![
            entry("aave-v3", Chain::Arbitrum, "USDC", 5.0),
            entry("aave-v3", Chain::Optimism, "USDC", 5.0),
        ];
        let best = best_apy_per_token(&feed);
        assert_eq!(best[0].chain, Chain::Arbitrum);

        let reversed: Vec<ApyEntry> = feed.into_iter().rev().collect();
        assert_eq!(best_apy_per_token(&reversed)[0].chain, Chain::Optimism);
    }

    #[test]
    fn test_observed_apy_matches_token_and_chain() {
        let feed = vec![
            entry("aave-v3", Chain::Arbitrum, "USDC", 5.0),
            entry("aave-v3", Chain::Arbitrum, "USDT", 1.0),
        ];
        assert_eq!(observed_apy(&feed, "USDT", Chain::Arbitrum), Some(1.0));
        assert_eq!(observed_apy(&feed, "USDC", Chain::Polygon), None);
    }
}
