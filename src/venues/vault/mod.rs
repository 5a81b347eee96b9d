use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::model::{Amount, Chain, EventId, EventKind, VaultEvent};
use crate::venues::evm;
use crate::venues::{AllocationRecorder, VaultContract, VaultEventSource};

// ── Token vault interface ───────────────────────────────────────────

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ITokenYieldVault {
        event Deposit(address indexed user, uint256 amount, uint256 shares);
        event Withdraw(address indexed user, uint256 amount, uint256 shares);

        function setCurrentAllocation(string allocation, uint256 apyBasisPoints) external;
        function currentAllocation() external view returns (string);
        function currentAPY() external view returns (uint256);
    }
}

/// Decode a vault log into a [`VaultEvent`] for `token`.
pub fn decode_vault_log(token: &str, log: &Log) -> Result<VaultEvent> {
    let block = log.block_number.context("vault log without block number")?;
    let log_index = log.log_index.context("vault log without log index")?;
    let topic0 = log.topics().first().context("vault log without topics")?;

    let (kind, user, amount) = if *topic0 == ITokenYieldVault::Deposit::SIGNATURE_HASH {
        let event = log.log_decode::<ITokenYieldVault::Deposit>()?.data().clone();
        (EventKind::Deposit, event.user, event.amount)
    } else if *topic0 == ITokenYieldVault::Withdraw::SIGNATURE_HASH {
        let event = log.log_decode::<ITokenYieldVault::Withdraw>()?.data().clone();
        (EventKind::Withdraw, event.user, event.amount)
    } else {
        bail!("unexpected vault event topic {topic0}");
    };

    Ok(VaultEvent {
        kind,
        token: token.to_string(),
        user,
        amount: Amount::new(amount),
        id: EventId { block, log_index },
    })
}

// ── Event source ────────────────────────────────────────────────────

/// Vault logs over JSON-RPC.
pub struct EvmVaultSource {
    provider: DynProvider,
}

impl EvmVaultSource {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("invalid vault RPC URL {rpc_url}"))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(EvmVaultSource { provider })
    }
}

#[async_trait]
impl VaultEventSource for EvmVaultSource {
    async fn chain_head(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("eth_blockNumber")
    }

    async fn query_logs(&self, vault: &VaultContract, from: u64, to: u64) -> Result<Vec<VaultEvent>> {
        let filter = Filter::new()
            .address(vault.address)
            .from_block(from)
            .to_block(to)
            .event_signature(vec![
                ITokenYieldVault::Deposit::SIGNATURE_HASH,
                ITokenYieldVault::Withdraw::SIGNATURE_HASH,
            ]);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("eth_getLogs {} blocks {from}-{to}", vault.token))?;

        let mut events = logs
            .iter()
            .map(|log| decode_vault_log(&vault.token, log))
            .collect::<Result<Vec<_>>>()?;
        events.sort_by_key(|e| e.id);

        debug!(token = %vault.token, from, to, events = events.len(), "vault logs");
        Ok(events)
    }
}

// ── Allocation metadata ─────────────────────────────────────────────

/// `round(apy * 100)`, clamped at zero.
pub fn apy_basis_points(apy: f64) -> U256 {
    if !apy.is_finite() || apy <= 0.0 {
        return U256::ZERO;
    }
    U256::from((apy * 100.0).round() as u64)
}

/// Writes `setCurrentAllocation` with the bot key.
pub struct VaultAllocationWriter {
    signer: PrivateKeySigner,
    rpc_url: String,
    vaults: HashMap<String, Address>,
}

impl VaultAllocationWriter {
    pub fn new(signer: PrivateKeySigner, rpc_url: &str, vaults: &[VaultContract]) -> Self {
        VaultAllocationWriter {
            signer,
            rpc_url: rpc_url.to_string(),
            vaults: vaults
                .iter()
                .map(|v| (v.token.clone(), v.address))
                .collect(),
        }
    }
}

#[async_trait]
impl AllocationRecorder for VaultAllocationWriter {
    async fn set_current_allocation(&self, token: &str, chain: Chain, apy: f64) -> Result<()> {
        let Some(&vault_addr) = self.vaults.get(token) else {
            bail!("no vault registered for {token}");
        };
        let bps = apy_basis_points(apy);
        let provider = evm::signing_provider(self.signer.clone(), &self.rpc_url)?;
        let vault = ITokenYieldVault::new(vault_addr, &provider);

        let pending = vault
            .setCurrentAllocation(chain.name().to_string(), bps)
            .send()
            .await
            .context("setCurrentAllocation failed")?;
        let receipt = pending
            .get_receipt()
            .await
            .context("setCurrentAllocation receipt")?;
        evm::require_success(&receipt, "setCurrentAllocation")?;

        info!(
            token,
            %chain,
            bps = %bps,
            vault = %evm::short_addr(&vault_addr),
            tx = ?receipt.transaction_hash,
            "vault allocation updated"
        );
        Ok(())
    }
}

/// What a vault currently advertises.
pub struct VaultAllocationView {
    pub allocation: String,
    pub apy_basis_points: U256,
}

pub async fn read_vault_allocation(rpc_url: &str, vault: Address) -> Result<VaultAllocationView> {
    let rp = evm::read_provider(rpc_url)?;
    let contract = ITokenYieldVault::new(vault, &rp);
    let allocation = contract
        .currentAllocation()
        .call()
        .await
        .context("currentAllocation")?;
    let apy_basis_points = contract.currentAPY().call().await.context("currentAPY")?;
    Ok(VaultAllocationView {
        allocation,
        apy_basis_points,
    })
}
