use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::QuoteApi;
use super::signer::sign_operation;
use super::types::{
    CallRequest, EvmAccount, EvmCall, OperationStatus, PrepareCallRequest, Quote,
    TokenAllowanceRequirement, TokenRequirement, aggregated_asset_id,
};
use crate::venues::lending::aave;
use crate::venues::{
    CallExecutor, ExecutionError, ExecutionReceipt, SupplyRequest, WithdrawRequest, evm,
};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorTiming {
    pub completion_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ExecutorTiming {
    fn default() -> Self {
        ExecutorTiming {
            completion_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Executes Aave supply/withdraw calls through OneBalance call quotes.
pub struct OneBalanceExecutor {
    api: Arc<dyn QuoteApi>,
    signer: PrivateKeySigner,
    account: EvmAccount,
    timing: ExecutorTiming,
    dry_run: bool,
}

impl OneBalanceExecutor {
    pub fn new(
        api: Arc<dyn QuoteApi>,
        signer: PrivateKeySigner,
        account: EvmAccount,
        timing: ExecutorTiming,
        dry_run: bool,
    ) -> Self {
        OneBalanceExecutor {
            api,
            signer,
            account,
            timing,
            dry_run,
        }
    }

    pub fn supply_request(&self, req: &SupplyRequest) -> Result<PrepareCallRequest, ExecutionError> {
        let asset = evm::token_address(req.chain, &req.token).ok_or_else(|| {
            ExecutionError::UnsupportedMarket {
                token: req.token.clone(),
                chain: req.chain,
            }
        })?;
        let pool = evm::aave_pool_address(req.chain);
        let asset_type = evm::asset_type(req.chain, asset);

        Ok(PrepareCallRequest {
            account: self.account.clone(),
            target_chain: req.chain.caip2(),
            calls: vec![EvmCall {
                to: pool,
                data: aave::encode_supply(asset, req.amount, self.account.account_address),
                value: "0x0".into(),
            }],
            tokens_required: vec![TokenRequirement {
                asset_type: asset_type.clone(),
                amount: req.amount,
            }],
            allowance_requirements: vec![TokenAllowanceRequirement {
                asset_type,
                amount: req.amount,
                spender: pool,
            }],
            overrides: Vec::new(),
            valid_after: Some("0".into()),
        })
    }

    pub fn withdraw_request(&self, req: &WithdrawRequest) -> Result<PrepareCallRequest, ExecutionError> {
        let asset = evm::token_address(req.chain, &req.token).ok_or_else(|| {
            ExecutionError::UnsupportedMarket {
                token: req.token.clone(),
                chain: req.chain,
            }
        })?;

        Ok(PrepareCallRequest {
            account: self.account.clone(),
            target_chain: req.chain.caip2(),
            calls: vec![EvmCall {
                to: evm::aave_pool_address(req.chain),
                data: aave::encode_withdraw(asset, req.amount, req.recipient),
                value: "0x0".into(),
            }],
            tokens_required: Vec::new(),
            allowance_requirements: Vec::new(),
            overrides: Vec::new(),
            valid_after: Some("0".into()),
        })
    }

    async fn execute(
        &self,
        request: PrepareCallRequest,
        token: &str,
        operation: &'static str,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let prepared = self
            .api
            .prepare_call_quote(&request)
            .await
            .map_err(ExecutionError::PrepareFailed)?;

        if self.dry_run {
            info!(token, operation, chain = %request.target_chain, "[DRY RUN] quote prepared, not executing");
            return Ok(ExecutionReceipt { quote_id: None });
        }

        let chain_operation = sign_operation(prepared.chain_operation, &self.signer)
            .await
            .map_err(ExecutionError::Signing)?;
        let call = CallRequest {
            account: self.account.clone(),
            chain_operation,
            tamper_proof_signature: prepared.tamper_proof_signature,
            from_aggregated_asset_id: aggregated_asset_id(token),
        };

        let quote = self
            .api
            .call_quote(&call)
            .await
            .map_err(ExecutionError::Api)?;
        let quote = self.sign_quote(quote).await?;
        debug!(token, operation, quote_id = %quote.id, "executing quote");

        let bundle = self
            .api
            .execute_quote(&quote)
            .await
            .map_err(ExecutionError::Api)?;
        if !bundle.success {
            return Err(ExecutionError::BundleRejected {
                quote_id: quote.id,
                reason: bundle.error.unwrap_or_else(|| "no reason given".into()),
            });
        }

        self.wait_for_completion(&quote.id).await?;
        info!(token, operation, quote_id = %quote.id, "quote completed");
        Ok(ExecutionReceipt {
            quote_id: Some(quote.id),
        })
    }

    async fn sign_quote(&self, mut quote: Quote) -> Result<Quote, ExecutionError> {
        let mut signed = Vec::with_capacity(quote.origin_chains_operations.len());
        for op in quote.origin_chains_operations {
            signed.push(
                sign_operation(op, &self.signer)
                    .await
                    .map_err(ExecutionError::Signing)?,
            );
        }
        quote.origin_chains_operations = signed;
        if let Some(op) = quote.destination_chain_operation.take() {
            quote.destination_chain_operation = Some(
                sign_operation(op, &self.signer)
                    .await
                    .map_err(ExecutionError::Signing)?,
            );
        }
        Ok(quote)
    }

    /// Poll until the quote reaches a terminal status or the timeout elapses.
    async fn wait_for_completion(&self, quote_id: &str) -> Result<(), ExecutionError> {
        let started = Instant::now();
        loop {
            match self.poll_status(quote_id).await {
                Ok(Some(OperationStatus::Completed)) => return Ok(()),
                Ok(Some(status)) if status.is_terminal() => {
                    return Err(ExecutionError::Failed {
                        quote_id: quote_id.to_string(),
                        status: status.as_str().to_string(),
                    });
                }
                Ok(Some(status)) => debug!(quote_id, status = status.as_str(), "quote in flight"),
                Ok(None) => debug!(quote_id, "quote not in history yet"),
                Err(e) => warn!(quote_id, error = %format!("{e:#}"), "status poll failed"),
            }

            let waited = started.elapsed();
            if waited >= self.timing.completion_timeout {
                return Err(ExecutionError::TimedOut {
                    quote_id: quote_id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    async fn poll_status(&self, quote_id: &str) -> anyhow::Result<Option<OperationStatus>> {
        let history = self.api.tx_history(self.account.account_address).await?;
        if let Some(tx) = history.transactions.first().filter(|tx| tx.quote_id == quote_id) {
            return Ok(Some(tx.status));
        }
        match self.api.execution_status(quote_id).await {
            Ok(status) if status.quote_id == quote_id => Ok(Some(status.status())),
            Ok(_) => Ok(None),
            Err(e) => {
                debug!(quote_id, error = %format!("{e:#}"), "execution status unavailable");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CallExecutor for OneBalanceExecutor {
    async fn supply(&self, request: &SupplyRequest) -> Result<ExecutionReceipt, ExecutionError> {
        info!(
            token = %request.token,
            chain = %request.chain,
            amount = %request.amount,
            "supply"
        );
        let prepare = self.supply_request(request)?;
        self.execute(prepare, &request.token, "supply").await
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<ExecutionReceipt, ExecutionError> {
        info!(
            token = %request.token,
            chain = %request.chain,
            amount = %request.amount,
            recipient = %evm::short_addr(&request.recipient),
            "withdraw"
        );
        let prepare = self.withdraw_request(request)?;
        self.execute(prepare, &request.token, "withdraw").await
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}
