pub mod decision;
pub mod ledger;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::model::{AllocationDecision, apy::best_apy_per_token};
use crate::run::state::StoreError;
use crate::venues::{
    AllocationRecorder, CallExecutor, ExecutionError, SupplyRequest, WithdrawRequest, YieldSource,
};

use decision::SkipReason;
use ledger::AllocationLedger;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Sleep between reallocation cycles.
    pub poll_interval: Duration,
    /// Pause after a supply fails with the funds already withdrawn.
    pub supply_failure_backoff: Duration,
    pub min_improvement_bps: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: Duration::from_secs(60),
            supply_failure_backoff: Duration::from_secs(10),
            min_improvement_bps: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetching yields: {0:#}")]
    Yields(anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub moved: Vec<AllocationDecision>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, String)>,
}

enum MoveError {
    Withdraw(ExecutionError),
    Supply(ExecutionError),
    Store(StoreError),
}

/// Periodically moves each token's capital to the best-yielding market.
///
/// Each token's move runs with the ledger locked, so event application never
/// observes a half-finished reallocation.
pub struct ReallocationEngine {
    ledger: Arc<Mutex<AllocationLedger>>,
    yields: Arc<dyn YieldSource>,
    executor: Arc<dyn CallExecutor>,
    recorder: Arc<dyn AllocationRecorder>,
    /// Aggregated account that receives withdrawn funds between markets.
    account: Address,
    enabled: BTreeSet<String>,
    config: EngineConfig,
}

impl ReallocationEngine {
    pub fn new(
        ledger: Arc<Mutex<AllocationLedger>>,
        yields: Arc<dyn YieldSource>,
        executor: Arc<dyn CallExecutor>,
        recorder: Arc<dyn AllocationRecorder>,
        account: Address,
        enabled: impl IntoIterator<Item = String>,
        config: EngineConfig,
    ) -> Self {
        ReallocationEngine {
            ledger,
            yields,
            executor,
            recorder,
            account,
            enabled: enabled.into_iter().collect(),
            config,
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let feed = self.yields.fetch_apys().await.map_err(EngineError::Yields)?;
        let best = best_apy_per_token(&feed);
        for entry in &best {
            debug!(token = %entry.token_symbol, chain = %entry.chain, apy = entry.apy, "best yield");
        }

        let mut report = CycleReport::default();
        let tokens = self.ledger.lock().await.tokens();
        for token in tokens {
            let mut ledger = self.ledger.lock().await;
            let Some(allocation) = ledger.allocation(&token).cloned() else {
                continue;
            };
            let best_entry = best.iter().find(|e| e.token_symbol == token);

            let decision = match decision::plan(
                &token,
                &allocation,
                self.enabled.contains(&token),
                &feed,
                best_entry,
                self.config.min_improvement_bps,
            ) {
                Ok(decision) => decision,
                Err(reason) => {
                    debug!(token = %token, reason = %reason, "no reallocation");
                    report.skipped.push((token, reason));
                    continue;
                }
            };

            match self.reallocate(&mut ledger, &decision).await {
                Ok(()) => {
                    drop(ledger);
                    self.record_on_vault(&decision).await;
                    report.moved.push(decision);
                }
                Err(MoveError::Withdraw(e)) => {
                    warn!(
                        token = %token,
                        chain = %decision.from_chain,
                        amount = %decision.amount,
                        error = %e,
                        "reallocation withdraw failed, allocation unchanged"
                    );
                    report.failed.push((token, e.to_string()));
                }
                Err(MoveError::Supply(e)) => {
                    drop(ledger);
                    error!(
                        token = %token,
                        from = %decision.from_chain,
                        to = %decision.to_chain,
                        amount = %decision.amount,
                        error = %e,
                        "reallocation supply failed after withdraw, funds left in aggregated account"
                    );
                    report.failed.push((token, e.to_string()));
                    tokio::time::sleep(self.config.supply_failure_backoff).await;
                }
                Err(MoveError::Store(e)) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    async fn reallocate(
        &self,
        ledger: &mut AllocationLedger,
        decision: &AllocationDecision,
    ) -> Result<(), MoveError> {
        info!(
            token = %decision.token,
            from = %decision.from_chain,
            to = %decision.to_chain,
            amount = %decision.amount,
            from_apy = decision.from_apy,
            target_apy = decision.target_apy,
            "reallocating"
        );
        self.executor
            .withdraw(&WithdrawRequest {
                token: decision.token.clone(),
                chain: decision.from_chain,
                amount: decision.amount,
                recipient: self.account,
            })
            .await
            .map_err(MoveError::Withdraw)?;
        self.executor
            .supply(&SupplyRequest {
                token: decision.token.clone(),
                chain: decision.to_chain,
                amount: decision.amount,
            })
            .await
            .map_err(MoveError::Supply)?;
        ledger.record_reallocation(decision).map_err(MoveError::Store)
    }

    async fn record_on_vault(&self, decision: &AllocationDecision) {
        if self.executor.dry_run() {
            info!(token = %decision.token, chain = %decision.to_chain, apy = decision.target_apy, "[DRY RUN] skipping vault allocation update");
            return;
        }
        if let Err(e) = self
            .recorder
            .set_current_allocation(&decision.token, decision.to_chain, decision.target_apy)
            .await
        {
            warn!(token = %decision.token, error = %format!("{e:#}"), "vault allocation update failed");
        }
    }

    /// Run cycles until a state write fails.
    pub async fn run_forever(&self) -> Result<(), EngineError> {
        loop {
            match self.run_cycle().await {
                Ok(report) => info!(
                    moved = report.moved.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    "reallocation cycle done"
                ),
                Err(EngineError::Yields(e)) => {
                    warn!(error = %format!("{e:#}"), "reallocation cycle skipped");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
