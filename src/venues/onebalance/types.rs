use alloy::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Amount;

// ── Accounts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmAccount {
    pub account_address: Address,
    pub session_address: Address,
    pub admin_address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictAddressRequest {
    pub session_address: Address,
    pub admin_address: Address,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictAddressResponse {
    pub predicted_address: Address,
}

// ── Balances ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualAssetBalance {
    pub asset_type: String,
    pub balance: Amount,
    #[serde(default)]
    pub fiat_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAssetBalance {
    pub aggregated_asset_id: String,
    pub balance: Amount,
    #[serde(default)]
    pub individual_asset_balances: Vec<IndividualAssetBalance>,
    #[serde(default)]
    pub fiat_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalBalance {
    pub fiat_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBalance {
    pub balance_by_aggregated_asset: Vec<AggregatedAssetBalance>,
    #[serde(default)]
    pub total_balance: Option<TotalBalance>,
}

impl AggregatedBalance {
    pub fn asset(&self, aggregated_asset_id: &str) -> Option<&AggregatedAssetBalance> {
        self.balance_by_aggregated_asset
            .iter()
            .find(|a| a.aggregated_asset_id == aggregated_asset_id)
    }
}

/// Aggregated asset id for a token symbol (`ds:usdc`).
pub fn aggregated_asset_id(token: &str) -> String {
    format!("ds:{}", token.to_lowercase())
}

// ── Call quotes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmCall {
    pub to: Address,
    pub data: Bytes,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequirement {
    pub asset_type: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAllowanceRequirement {
    pub asset_type: String,
    pub amount: Amount,
    pub spender: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareCallRequest {
    pub account: EvmAccount,
    /// CAIP-2 chain id.
    pub target_chain: String,
    pub calls: Vec<EvmCall>,
    pub tokens_required: Vec<TokenRequirement>,
    pub allowance_requirements: Vec<TokenAllowanceRequirement>,
    pub overrides: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_after: Option<String>,
}

/// A serialized ERC-4337 user operation. Only the signature is touched here;
/// every other field is passed back to the API verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOperation {
    #[serde(default)]
    pub signature: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOperation {
    pub user_op: UserOperation,
    pub typed_data_to_sign: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCallQuote {
    pub account: EvmAccount,
    pub chain_operation: ChainOperation,
    pub tamper_proof_signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub account: EvmAccount,
    pub chain_operation: ChainOperation,
    pub tamper_proof_signature: String,
    pub from_aggregated_asset_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub account: EvmAccount,
    #[serde(default)]
    pub origin_chains_operations: Vec<ChainOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_chain_operation: Option<ChainOperation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Refunded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Refunded | OperationStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Refunded => "REFUNDED",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTransaction {
    pub quote_id: String,
    pub status: OperationStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub transactions: Vec<HistoryTransaction>,
}

/// `status` arrives either as a bare string or as `{ "status": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StatusField {
    Plain(OperationStatus),
    Nested { status: OperationStatus },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStatus {
    pub quote_id: String,
    status: StatusField,
}

impl QuoteStatus {
    pub fn new(quote_id: impl Into<String>, status: OperationStatus) -> Self {
        QuoteStatus {
            quote_id: quote_id.into(),
            status: StatusField::Plain(status),
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self.status {
            StatusField::Plain(s) | StatusField::Nested { status: s } => s,
        }
    }
}
