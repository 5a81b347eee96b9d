use std::fmt;

use crate::model::{Allocation, AllocationDecision, ApyEntry, Chain, apy};

/// Why a token was left where it is.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotEnabled,
    NothingDeployed,
    NoYieldData,
    AlreadyOnBest { chain: Chain },
    NotBetter { current: f64, best: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotEnabled => write!(f, "token not enabled"),
            SkipReason::NothingDeployed => write!(f, "nothing deployed"),
            SkipReason::NoYieldData => write!(f, "no yield data"),
            SkipReason::AlreadyOnBest { chain } => write!(f, "already on best market {chain}"),
            SkipReason::NotBetter { current, best } => {
                write!(f, "best {best:.3}% does not beat current {current:.3}%")
            }
        }
    }
}

/// Decide whether `token`'s allocation should move to the feed's best market.
///
/// Current yield is the feed's figure for the allocation's own chain when it
/// reports one, else the recorded `at_apy`. A move needs the best entry to beat
/// it by more than `min_improvement_bps`.
pub fn plan(
    token: &str,
    allocation: &Allocation,
    enabled: bool,
    feed: &[ApyEntry],
    best: Option<&ApyEntry>,
    min_improvement_bps: f64,
) -> Result<AllocationDecision, SkipReason> {
    if !enabled {
        return Err(SkipReason::NotEnabled);
    }
    if allocation.is_inert() {
        return Err(SkipReason::NothingDeployed);
    }
    let best = best.ok_or(SkipReason::NoYieldData)?;
    if best.chain == allocation.chain {
        return Err(SkipReason::AlreadyOnBest { chain: best.chain });
    }

    let current = apy::observed_apy(feed, token, allocation.chain).unwrap_or(allocation.at_apy);
    if best.apy <= current + min_improvement_bps / 100.0 {
        return Err(SkipReason::NotBetter {
            current,
            best: best.apy,
        });
    }

    Ok(AllocationDecision {
        token: token.to_string(),
        from_chain: allocation.chain,
        to_chain: best.chain,
        amount: allocation.amount,
        from_apy: current,
        target_apy: best.apy,
    })
}
