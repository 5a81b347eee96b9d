use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::engine::ledger::{AllocationLedger, Applied, LedgerError};
use crate::model::{EventId, FeedItem, VaultEvent};
use crate::run::backfill::{ReplayOrder, scan_range};
use crate::run::state::StoreError;
use crate::venues::{RetryPolicy, VaultContract, VaultEventSource};

/// What happened to one event handed to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Duplicate,
    /// Kept for retry (or halted token); blocks the watermark.
    Parked,
    /// Unregistered token; logged and dropped.
    Rejected,
}

/// Sole consumer of the merged feed; the only caller of `AllocationLedger::apply`.
///
/// Events that fail recoverably are parked and retried on the next block tick.
/// A fatal failure halts its token: that event and every later event of the
/// token stay parked until an operator intervenes. The watermark never moves
/// past the earliest parked event.
pub struct FeedProcessor {
    ledger: Arc<Mutex<AllocationLedger>>,
    parked: BTreeMap<EventId, VaultEvent>,
    halted: BTreeSet<String>,
    ceiling: Option<u64>,
}

impl FeedProcessor {
    pub fn new(ledger: Arc<Mutex<AllocationLedger>>) -> Self {
        FeedProcessor {
            ledger,
            parked: BTreeMap::new(),
            halted: BTreeSet::new(),
            ceiling: None,
        }
    }

    /// Cap the watermark at `block` for the rest of the run.
    pub fn set_ceiling(&mut self, block: u64) {
        self.ceiling = Some(self.ceiling.map_or(block, |c| c.min(block)));
    }

    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    pub fn parked(&self) -> impl Iterator<Item = &VaultEvent> {
        self.parked.values()
    }

    pub fn halted_tokens(&self) -> &BTreeSet<String> {
        &self.halted
    }

    /// Only a failed state write is returned; it is fatal for the process.
    pub async fn handle(&mut self, item: FeedItem) -> Result<Option<Disposition>, StoreError> {
        match item {
            FeedItem::Event(event) => self.handle_event(event).await.map(Some),
            FeedItem::Block(block) => self.handle_block(block).await.map(|_| None),
        }
    }

    async fn handle_event(&mut self, event: VaultEvent) -> Result<Disposition, StoreError> {
        if self.parked.contains_key(&event.id) {
            return Ok(Disposition::Parked);
        }
        // Per-token order: nothing overtakes a parked event of the same token.
        if self.halted.contains(&event.token) || self.parked.values().any(|p| p.token == event.token) {
            debug!(token = %event.token, id = %event.id, "queued behind parked event");
            self.parked.insert(event.id, event);
            return Ok(Disposition::Parked);
        }
        self.try_apply(event).await
    }

    async fn try_apply(&mut self, event: VaultEvent) -> Result<Disposition, StoreError> {
        let result = self.ledger.lock().await.apply(&event).await;
        match result {
            Ok(Applied::Applied) => Ok(Disposition::Applied),
            Ok(Applied::Duplicate) => {
                debug!(token = %event.token, id = %event.id, "event already applied");
                Ok(Disposition::Duplicate)
            }
            Err(LedgerError::Store(e)) => Err(e),
            Err(e @ LedgerError::UnregisteredToken { .. }) => {
                error!(
                    token = %event.token,
                    kind = %event.kind,
                    amount = %event.amount,
                    id = %event.id,
                    error = %e,
                    "event rejected"
                );
                Ok(Disposition::Rejected)
            }
            Err(e) if e.is_fatal() => {
                error!(
                    token = %event.token,
                    kind = %event.kind,
                    amount = %event.amount,
                    id = %event.id,
                    error = %e,
                    "invariant breach, halting token until operator reconciles"
                );
                self.halted.insert(event.token.clone());
                self.parked.insert(event.id, event);
                Ok(Disposition::Parked)
            }
            Err(e) => {
                warn!(
                    token = %event.token,
                    kind = %event.kind,
                    amount = %event.amount,
                    id = %event.id,
                    error = %e,
                    "event application failed, will retry"
                );
                self.parked.insert(event.id, event);
                Ok(Disposition::Parked)
            }
        }
    }

    async fn handle_block(&mut self, block: u64) -> Result<(), StoreError> {
        self.retry_parked().await?;

        let mut target = block;
        if let Some(first) = self.parked.keys().next() {
            target = target.min(first.block.saturating_sub(1));
        }
        if let Some(ceiling) = self.ceiling {
            target = target.min(ceiling);
        }

        let advanced = self.ledger.lock().await.advance_watermark(target)?;
        if advanced {
            debug!(block = target, "watermark advanced");
        } else if target < block {
            debug!(head = block, held_at = target, parked = self.parked.len(), "watermark held");
        }
        Ok(())
    }

    async fn retry_parked(&mut self) -> Result<(), StoreError> {
        let pending: Vec<VaultEvent> = self.parked.values().cloned().collect();
        let mut blocked: BTreeSet<String> = self.halted.clone();

        for event in pending {
            if blocked.contains(&event.token) {
                continue;
            }
            self.parked.remove(&event.id);
            if self.try_apply(event.clone()).await? == Disposition::Parked {
                blocked.insert(event.token.clone());
            } else {
                info!(token = %event.token, id = %event.id, "parked event resolved");
            }
        }
        Ok(())
    }
}

// ── Live feed ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct LiveFeedConfig {
    pub poll_interval: Duration,
    pub window: u64,
    pub retry: RetryPolicy,
}

/// Poll the chain for new vault events after `cursor`, sending them in
/// `(block, log_index)` order followed by `Block(n)` once everything up to `n`
/// has been sent. A failed window leaves the cursor before it for the next tick.
pub async fn run_live_feed(
    source: Arc<dyn VaultEventSource>,
    vaults: Vec<VaultContract>,
    mut cursor: u64,
    config: LiveFeedConfig,
    tx: mpsc::Sender<FeedItem>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(cursor, "live feed started");

    loop {
        ticker.tick().await;

        let head = match source.chain_head().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "chain head unavailable");
                continue;
            }
        };
        if head <= cursor {
            continue;
        }

        let scan = scan_range(
            source.as_ref(),
            &vaults,
            cursor + 1,
            head,
            config.window,
            ReplayOrder::Chronological,
            config.retry,
        )
        .await;

        let reached = match scan.failed_windows.iter().map(|w| w.0).min() {
            Some(start) => {
                warn!(from = start, head, "live window failed, will retry");
                start - 1
            }
            None => head,
        };

        for event in scan.events.into_iter().filter(|e| e.block() <= reached) {
            if tx.send(FeedItem::Event(event)).await.is_err() {
                return;
            }
        }
        if reached > cursor {
            cursor = reached;
            if tx.send(FeedItem::Block(cursor)).await.is_err() {
                return;
            }
        }
    }
}
