use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::model::{
    Allocation, AllocationDecision, Amount, AmountError, BotState, Chain, EventId, EventKind,
    VaultEvent,
};
use crate::run::state::{PersistentState, StateStore, StoreError};
use crate::venues::{
    AccountBalances, CallExecutor, ExecutionError, PositionReader, SupplyRequest, WithdrawRequest,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{token} has no allocation entry, refusing to invent one")]
    UnregisteredToken { token: String },

    #[error("{token} withdraw of {requested} exceeds tracked {tracked}")]
    Underflow {
        token: String,
        tracked: Amount,
        requested: Amount,
    },

    #[error("{token} allocation overflows: {source}")]
    Overflow { token: String, source: AmountError },

    #[error("{token} aggregated balance {balance} is below deposit {deposit}")]
    BalanceBelowDeposit {
        token: String,
        balance: Amount,
        deposit: Amount,
    },

    #[error("{token} {operation} failed: {source}")]
    Execution {
        token: String,
        operation: EventKind,
        #[source]
        source: ExecutionError,
    },

    #[error("{token} {operation}: {source:#}")]
    Transport {
        token: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Invariant breaches that need an operator; everything else may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::UnregisteredToken { .. }
                | LedgerError::Underflow { .. }
                | LedgerError::Overflow { .. }
                | LedgerError::BalanceBelowDeposit { .. }
                | LedgerError::Execution {
                    source: ExecutionError::UnsupportedMarket { .. },
                    ..
                }
                | LedgerError::Store(_)
        )
    }
}

/// Applied ids are pruned as the watermark moves. While it is held (halted
/// token, backfill ceiling) the set grows with every event; warn at each
/// multiple of this size.
pub const APPLIED_EVENTS_WARN_STEP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Already applied under this event id; nothing changed.
    Duplicate,
}

/// The single writer of allocation state.
///
/// Deposits are supplied into the token's current market, withdrawals are paid
/// out to the user from it. The record is only mutated after the executor
/// reports success, and each mutation is committed together with the event id.
pub struct AllocationLedger {
    state: PersistentState,
    executor: Arc<dyn CallExecutor>,
    balances: Arc<dyn AccountBalances>,
}

impl AllocationLedger {
    /// Open the store and seed zero allocations on `default_chain` for new tokens.
    ///
    /// With a dry-run executor the store is only read: nothing is written back.
    pub fn load<'a>(
        store: Box<dyn StateStore>,
        start_block: u64,
        tokens: impl IntoIterator<Item = &'a str>,
        default_chain: Chain,
        executor: Arc<dyn CallExecutor>,
        balances: Arc<dyn AccountBalances>,
    ) -> Result<Self, StoreError> {
        let mut state = PersistentState::open(store, start_block)?;
        if executor.dry_run() {
            state.detach();
        }
        state.initialize(tokens, default_chain)?;
        Ok(AllocationLedger {
            state,
            executor,
            balances,
        })
    }

    pub fn allocation(&self, token: &str) -> Option<&Allocation> {
        self.state.get_allocation(token)
    }

    pub fn last_known_block(&self) -> u64 {
        self.state.get_state().last_known_block
    }

    pub fn snapshot(&self) -> BotState {
        self.state.get_state().clone()
    }

    pub fn is_applied(&self, id: &EventId) -> bool {
        self.state.applied_events().contains(id)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.get_state().allocations.keys().cloned().collect()
    }

    pub async fn apply(&mut self, event: &VaultEvent) -> Result<Applied, LedgerError> {
        if self.is_applied(&event.id) {
            return Ok(Applied::Duplicate);
        }
        let allocation = self
            .allocation(&event.token)
            .cloned()
            .ok_or_else(|| LedgerError::UnregisteredToken {
                token: event.token.clone(),
            })?;

        let amount = match event.kind {
            EventKind::Deposit => self.deposit(event, &allocation).await?,
            EventKind::Withdraw => self.withdraw(event, &allocation).await?,
        };

        let record = self.state.stage();
        if let Some(entry) = record.allocations.get_mut(&event.token) {
            entry.amount = amount;
        }
        record.applied_events.insert(event.id);
        let pending_ids = record.applied_events.len();
        self.state.commit()?;
        if pending_ids % APPLIED_EVENTS_WARN_STEP == 0 {
            warn!(
                applied_ids = pending_ids,
                last_known_block = self.last_known_block(),
                "applied-event set keeps growing, watermark is held back"
            );
        }

        info!(
            token = %event.token,
            kind = %event.kind,
            amount = %event.amount,
            tracked = %amount,
            chain = %allocation.chain,
            id = %event.id,
            "event applied"
        );
        Ok(Applied::Applied)
    }

    async fn deposit(&self, event: &VaultEvent, allocation: &Allocation) -> Result<Amount, LedgerError> {
        let token = &event.token;
        let new_amount = allocation
            .amount
            .checked_add(event.amount)
            .map_err(|source| LedgerError::Overflow {
                token: token.clone(),
                source,
            })?;
        if event.amount.is_zero() {
            return Ok(new_amount);
        }

        let balance = self
            .balances
            .aggregated_balance(token)
            .await
            .map_err(|source| LedgerError::Transport {
                token: token.clone(),
                operation: "aggregated balance",
                source,
            })?;
        if balance < event.amount {
            return Err(LedgerError::BalanceBelowDeposit {
                token: token.clone(),
                balance,
                deposit: event.amount,
            });
        }

        self.executor
            .supply(&SupplyRequest {
                token: token.clone(),
                chain: allocation.chain,
                amount: event.amount,
            })
            .await
            .map_err(|source| LedgerError::Execution {
                token: token.clone(),
                operation: EventKind::Deposit,
                source,
            })?;
        Ok(new_amount)
    }

    async fn withdraw(&self, event: &VaultEvent, allocation: &Allocation) -> Result<Amount, LedgerError> {
        let token = &event.token;
        let new_amount = allocation.amount.checked_sub(event.amount).map_err(|_| {
            LedgerError::Underflow {
                token: token.clone(),
                tracked: allocation.amount,
                requested: event.amount,
            }
        })?;
        if event.amount.is_zero() {
            return Ok(new_amount);
        }

        self.executor
            .withdraw(&WithdrawRequest {
                token: token.clone(),
                chain: allocation.chain,
                amount: event.amount,
                recipient: event.user,
            })
            .await
            .map_err(|source| LedgerError::Execution {
                token: token.clone(),
                operation: EventKind::Withdraw,
                source,
            })?;
        Ok(new_amount)
    }

    /// Move the watermark forward to `block` and drop ids below it.
    /// Returns `false` when `block` is not ahead of the current watermark.
    pub fn advance_watermark(&mut self, block: u64) -> Result<bool, StoreError> {
        if block <= self.last_known_block() {
            return Ok(false);
        }
        let record = self.state.stage();
        record.last_known_block = block;
        record.applied_events.retain(|id| id.block >= block);
        self.state.commit()?;
        Ok(true)
    }

    /// Record a completed market move.
    pub fn record_reallocation(&mut self, decision: &AllocationDecision) -> Result<(), StoreError> {
        self.state.set_allocation(
            &decision.token,
            Allocation {
                amount: decision.amount,
                at_apy: decision.target_apy,
                chain: decision.to_chain,
            },
        )
    }

    /// Overwrite tracked allocations with on-chain positions read at startup.
    ///
    /// The largest non-zero position wins. A token with no position keeps its
    /// record. A read failure skips that token.
    pub async fn reconcile_from_chain(&mut self, reader: &dyn PositionReader) -> Result<(), StoreError> {
        for token in self.tokens() {
            let positions = match reader.positions(&token).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(token = %token, error = %format!("{e:#}"), "position read failed, keeping tracked allocation");
                    continue;
                }
            };
            let Some(tracked) = self.allocation(&token).cloned() else {
                continue;
            };

            let Some(largest) = positions
                .iter()
                .filter(|p| !p.amount.is_zero())
                .max_by_key(|p| p.amount)
            else {
                if !tracked.is_inert() {
                    warn!(token = %token, tracked = %tracked.amount, chain = %tracked.chain, "no on-chain position found for tracked allocation");
                }
                continue;
            };
            if positions.len() > 1 {
                warn!(token = %token, markets = positions.len(), "positions on several markets, tracking the largest");
            }
            if largest.amount == tracked.amount && largest.chain == tracked.chain {
                continue;
            }

            let at_apy = if largest.chain == tracked.chain {
                tracked.at_apy
            } else {
                0.0
            };
            info!(
                token = %token,
                from = %tracked.amount,
                to = %largest.amount,
                chain = %largest.chain,
                "reconciled allocation from chain"
            );
            self.state.set_allocation(
                &token,
                Allocation {
                    amount: largest.amount,
                    at_apy,
                    chain: largest.chain,
                },
            )?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.state.commit()
    }
}
