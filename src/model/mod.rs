pub mod allocation;
pub mod amount;
pub mod apy;
pub mod chain;
pub mod event;

pub use allocation::{Allocation, AllocationDecision, BotState, BotStatePatch};
pub use amount::{Amount, AmountError};
pub use apy::ApyEntry;
pub use chain::Chain;
pub use event::{EventId, EventKind, FeedItem, VaultEvent};
