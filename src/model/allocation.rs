use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::amount::Amount;
use super::chain::Chain;
use super::event::EventId;

/// Where a token's deployed capital sits and what it currently earns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Principal currently deployed, in base units.
    pub amount: Amount,
    /// Annual yield (percent) the amount was placed at.
    #[serde(rename = "atAPY")]
    pub at_apy: f64,
    /// Market chain holding the funds. Kept while `amount` is zero as the
    /// placement target for the next deposit.
    pub chain: Chain,
}

impl Allocation {
    pub fn empty(chain: Chain) -> Self {
        Allocation {
            amount: Amount::ZERO,
            at_apy: 0.0,
            chain,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.amount.is_zero()
    }
}

/// Process-wide durable record.
///
/// `last_known_block` and `allocations` always travel together: the pair is an
/// "applied up to" snapshot. `applied_events` holds the ids of events already
/// applied in blocks at or above the watermark, so an inclusive replay of the
/// watermark block never applies an event twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BotState {
    pub last_known_block: u64,
    pub allocations: BTreeMap<String, Allocation>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub applied_events: BTreeSet<EventId>,
    /// Unix timestamp of the last commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl BotState {
    pub fn new(start_block: u64) -> Self {
        BotState {
            last_known_block: start_block,
            ..BotState::default()
        }
    }
}

/// Partial update for [`BotState`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct BotStatePatch {
    pub last_known_block: Option<u64>,
    pub allocations: Option<BTreeMap<String, Allocation>>,
}

/// A move of one token's capital from one market to another.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDecision {
    pub token: String,
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub amount: Amount,
    /// Yield the funds were earning before the move (observed or recorded).
    pub from_apy: f64,
    pub target_apy: f64,
}
