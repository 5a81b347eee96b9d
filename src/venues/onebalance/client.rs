use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::QuoteApi;
use super::types::{
    AggregatedBalance, BundleResponse, CallRequest, HistoryResponse, PrepareCallRequest,
    PredictAddressRequest, PredictAddressResponse, Quote, QuoteStatus, TargetCallQuote,
};

pub const ONEBALANCE_API_BASE: &str = "https://be.onebalance.io/api";

/// HTTP client for the OneBalance balance-aggregation API.
#[derive(Clone)]
pub struct OneBalanceClient {
    client: reqwest::Client,
    base_url: String,
}

impl OneBalanceClient {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, ONEBALANCE_API_BASE)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("vault-flow/0.1")
            .default_headers(headers)
            .build()
            .context("creating OneBalance HTTP client")?;

        Ok(OneBalanceClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?;
        Self::decode(endpoint, resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        Self::decode(endpoint, resp).await
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, resp: reqwest::Response) -> Result<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("OneBalance {endpoint} error {status}: {body}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding OneBalance {endpoint} response"))
    }

    // ── Accounts and balances ──

    pub async fn predict_address(&self, session: Address, admin: Address) -> Result<Address> {
        let resp: PredictAddressResponse = self
            .post(
                "/account/predict-address",
                &PredictAddressRequest {
                    session_address: session,
                    admin_address: admin,
                },
            )
            .await?;
        Ok(resp.predicted_address)
    }

    pub async fn aggregated_balance(&self, account: Address) -> Result<AggregatedBalance> {
        let address = format!("{account:?}");
        self.get("/v2/balances/aggregated-balance", &[("address", address.as_str())])
            .await
    }
}

#[async_trait]
impl QuoteApi for OneBalanceClient {
    async fn prepare_call_quote(&self, request: &PrepareCallRequest) -> Result<TargetCallQuote> {
        self.post("/quotes/prepare-call-quote", request).await
    }

    async fn call_quote(&self, request: &CallRequest) -> Result<Quote> {
        self.post("/quotes/call-quote", request).await
    }

    async fn execute_quote(&self, quote: &Quote) -> Result<BundleResponse> {
        self.post("/quotes/execute-quote", quote).await
    }

    async fn tx_history(&self, account: Address) -> Result<HistoryResponse> {
        let user = format!("{account:?}");
        self.get(
            "/status/get-tx-history",
            &[("user", user.as_str()), ("limit", "1"), ("sortBy", "createdAt")],
        )
        .await
    }

    async fn execution_status(&self, quote_id: &str) -> Result<QuoteStatus> {
        self.get("/status/get-execution-status", &[("quoteId", quote_id)])
            .await
    }
}
