pub mod evm;
pub mod lending;
pub mod onebalance;
pub mod vault;
pub mod yields;

use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Amount, ApyEntry, Chain, VaultEvent};

// ── Cross-chain call execution ──────────────────────────────────────

/// Supply `amount` of `token` into the lending market on `chain`, crediting
/// the bot's aggregated account.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyRequest {
    pub token: String,
    pub chain: Chain,
    pub amount: Amount,
}

/// Withdraw `amount` of `token` from the lending market on `chain`, paying
/// the proceeds to `recipient`.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawRequest {
    pub token: String,
    pub chain: Chain,
    pub amount: Amount,
    pub recipient: Address,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReceipt {
    /// `None` in dry-run mode, where nothing is executed.
    pub quote_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no {token} lending market configured on {chain}")]
    UnsupportedMarket { token: String, chain: Chain },

    #[error("preparing quote failed: {0:#}")]
    PrepareFailed(#[source] anyhow::Error),

    #[error("signing chain operation failed: {0:#}")]
    Signing(#[source] anyhow::Error),

    #[error("quote API call failed: {0:#}")]
    Api(#[source] anyhow::Error),

    #[error("bundle for quote {quote_id} was rejected: {reason}")]
    BundleRejected { quote_id: String, reason: String },

    #[error("quote {quote_id} finished with status {status}")]
    Failed { quote_id: String, status: String },

    #[error("quote {quote_id} not completed after {waited:?}")]
    TimedOut { quote_id: String, waited: Duration },
}

/// Turns an allocation decision into an executed cross-chain call.
///
/// A returned `Ok` means the call completed on chain. Any error means the
/// outcome must not be assumed.
#[async_trait]
pub trait CallExecutor: Send + Sync {
    async fn supply(&self, request: &SupplyRequest) -> Result<ExecutionReceipt, ExecutionError>;

    async fn withdraw(&self, request: &WithdrawRequest)
    -> Result<ExecutionReceipt, ExecutionError>;

    /// Calls are prepared but never executed. State built on them must not be persisted.
    fn dry_run(&self) -> bool {
        false
    }
}

// ── Read-side collaborators ─────────────────────────────────────────

/// Balance of the bot's aggregated account across all chains.
#[async_trait]
pub trait AccountBalances: Send + Sync {
    async fn aggregated_balance(&self, token: &str) -> anyhow::Result<Amount>;
}

/// A supplied position in a lending market.
#[derive(Debug, Clone, PartialEq)]
pub struct LendingPosition {
    pub chain: Chain,
    pub amount: Amount,
}

/// Ground-truth lending positions held by the aggregated account.
#[async_trait]
pub trait PositionReader: Send + Sync {
    async fn positions(&self, token: &str) -> anyhow::Result<Vec<LendingPosition>>;
}

/// Current yields per protocol, chain and token.
#[async_trait]
pub trait YieldSource: Send + Sync {
    async fn fetch_apys(&self) -> anyhow::Result<Vec<ApyEntry>>;
}

// ── Vault contracts ─────────────────────────────────────────────────

/// A registered token vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultContract {
    pub token: String,
    pub address: Address,
}

/// Chain access for vault events.
#[async_trait]
pub trait VaultEventSource: Send + Sync {
    async fn chain_head(&self) -> anyhow::Result<u64>;

    /// Deposit and Withdraw events emitted by `vault` in `from..=to`, in
    /// `(block, log_index)` order. Callers keep the range within the
    /// provider's log-query limit.
    async fn query_logs(
        &self,
        vault: &VaultContract,
        from: u64,
        to: u64,
    ) -> anyhow::Result<Vec<VaultEvent>>;
}

/// Writes allocation metadata back to a token's vault contract.
#[async_trait]
pub trait AllocationRecorder: Send + Sync {
    async fn set_current_allocation(&self, token: &str, chain: Chain, apy: f64)
    -> anyhow::Result<()>;
}

// ── Retry helper ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `f` until it succeeds, doubling the delay after each failure.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, f: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, error = %format!("{e:#}"), "retrying");
                tokio::time::sleep(policy.base_delay * 2u32.pow(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry(fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("flaky")
            }
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("down")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
