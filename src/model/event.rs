use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use super::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Deposit,
    Withdraw,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Deposit => f.write_str("deposit"),
            EventKind::Withdraw => f.write_str("withdraw"),
        }
    }
}

/// Position of a log on chain; orders events chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventId {
    pub block: u64,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// A user deposit into, or withdrawal from, a token vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEvent {
    pub kind: EventKind,
    pub token: String,
    pub user: Address,
    pub amount: Amount,
    pub id: EventId,
}

impl VaultEvent {
    pub fn block(&self) -> u64 {
        self.id.block
    }
}

/// One item of the sequential feed consumed by the feed processor.
///
/// A `Block(n)` item is only emitted after every event in blocks `<= n` has
/// been emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Event(VaultEvent),
    Block(u64),
}
