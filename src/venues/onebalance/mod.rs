pub mod client;
pub mod executor;
pub mod signer;
pub mod types;

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;

use crate::model::Amount;
use crate::venues::AccountBalances;

pub use client::OneBalanceClient;
pub use executor::{ExecutorTiming, OneBalanceExecutor};
use types::{
    BundleResponse, CallRequest, HistoryResponse, PrepareCallRequest, Quote, QuoteStatus,
    TargetCallQuote, aggregated_asset_id,
};

/// The quote lifecycle endpoints.
#[async_trait]
pub trait QuoteApi: Send + Sync {
    async fn prepare_call_quote(&self, request: &PrepareCallRequest) -> Result<TargetCallQuote>;

    async fn call_quote(&self, request: &CallRequest) -> Result<Quote>;

    async fn execute_quote(&self, quote: &Quote) -> Result<BundleResponse>;

    /// Most recent operation of `account`.
    async fn tx_history(&self, account: Address) -> Result<HistoryResponse>;

    async fn execution_status(&self, quote_id: &str) -> Result<QuoteStatus>;
}

/// Aggregated balances of one OneBalance account.
pub struct AggregatedBalances {
    client: OneBalanceClient,
    account: Address,
}

impl AggregatedBalances {
    pub fn new(client: OneBalanceClient, account: Address) -> Self {
        AggregatedBalances { client, account }
    }
}

#[async_trait]
impl AccountBalances for AggregatedBalances {
    async fn aggregated_balance(&self, token: &str) -> Result<Amount> {
        let balance = self.client.aggregated_balance(self.account).await?;
        Ok(balance
            .asset(&aggregated_asset_id(token))
            .map(|a| a.balance)
            .unwrap_or(Amount::ZERO))
    }
}
