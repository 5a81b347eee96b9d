use alloy::dyn_abi::TypedData;
use alloy::hex;
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};

use super::types::ChainOperation;

/// Sign a chain operation's EIP-712 payload into `userOp.signature`.
pub async fn sign_operation(mut operation: ChainOperation, signer: &PrivateKeySigner) -> Result<ChainOperation> {
    let typed: TypedData = serde_json::from_value(operation.typed_data_to_sign.clone())
        .context("typedDataToSign is not EIP-712 typed data")?;
    let hash = typed
        .eip712_signing_hash()
        .context("hashing typedDataToSign")?;
    let signature = signer
        .sign_hash(&hash)
        .await
        .context("signing chain operation")?;
    operation.user_op.signature = hex::encode_prefixed(signature.as_bytes());
    Ok(operation)
}
