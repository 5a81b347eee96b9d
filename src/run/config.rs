use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result, bail};

use crate::cli::{RunArgs, YieldSourceKind};
use crate::model::Chain;
use crate::engine::EngineConfig;
use crate::run::backfill::{BackfillConfig, ReplayOrder};
use crate::run::DEFAULT_CHAIN;
use crate::run::feed::LiveFeedConfig;
use crate::venues::yields::{AaveReserveYields, DefiLlamaYields};
use crate::venues::{RetryPolicy, VaultContract, YieldSource, evm};

pub const PRIVATE_KEY_ENV: &str = "VAULT_FLOW_PRIVATE_KEY";
pub const API_KEY_ENV: &str = "ONEBALANCE_API_KEY";
pub const VAULT_RPC_ENV: &str = "VAULT_RPC_URL";

/// Runtime configuration for the `run` command.
pub struct RuntimeConfig {
    pub signer: PrivateKeySigner,
    pub wallet_address: Address,
    pub api_key: String,
    pub vault_rpc_url: String,
    pub vaults: Vec<VaultContract>,
    pub markets: Vec<Chain>,
    pub yield_source: YieldSourceKind,
    pub state_file: PathBuf,
    pub start_block: u64,
    pub poll_interval: Duration,
    pub feed_poll_interval: Duration,
    pub backfill_window: u64,
    pub replay_order: ReplayOrder,
    pub min_improvement_bps: f64,
    pub dry_run: bool,
    pub once: bool,
}

impl RuntimeConfig {
    pub fn from_cli(cli: &RunArgs) -> Result<Self> {
        let signer = signer_from_env()?;
        let wallet_address = signer.address();
        let api_key = api_key_from_env()?;

        let vault_rpc_url = match &cli.vault_rpc_url {
            Some(url) => url.clone(),
            None => std::env::var(VAULT_RPC_ENV).unwrap_or_else(|_| Chain::Arbitrum.rpc_url().to_string()),
        };

        let vaults = if cli.vaults.is_empty() {
            evm::default_vaults()
                .into_iter()
                .map(|(token, address)| VaultContract {
                    token: token.to_string(),
                    address,
                })
                .collect()
        } else {
            cli.vaults
                .iter()
                .map(|v| parse_vault(v))
                .collect::<Result<Vec<_>>>()?
        };

        if cli.poll_secs == 0 || cli.feed_poll_secs == 0 {
            bail!("--poll-secs and --feed-poll-secs must be at least 1");
        }
        if cli.backfill_window == 0 {
            bail!("--backfill-window must be at least 1");
        }
        if !cli.min_improvement_bps.is_finite() || cli.min_improvement_bps < 0.0 {
            bail!("--min-improvement-bps must be a non-negative number");
        }

        let markets = parse_markets(&cli.markets)?;
        check_vault_markets(&vaults, &markets, DEFAULT_CHAIN)?;

        Ok(RuntimeConfig {
            signer,
            wallet_address,
            api_key,
            vault_rpc_url,
            vaults,
            markets,
            yield_source: cli.yield_source,
            state_file: cli.state_file.clone(),
            start_block: cli.start_block,
            poll_interval: Duration::from_secs(cli.poll_secs),
            feed_poll_interval: Duration::from_secs(cli.feed_poll_secs),
            backfill_window: cli.backfill_window,
            replay_order: cli.replay_order,
            min_improvement_bps: cli.min_improvement_bps,
            dry_run: cli.dry_run,
            once: cli.once,
        })
    }

    pub fn tokens(&self) -> Vec<String> {
        self.vaults.iter().map(|v| v.token.clone()).collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: self.poll_interval,
            min_improvement_bps: self.min_improvement_bps,
            ..EngineConfig::default()
        }
    }

    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            window: self.backfill_window,
            order: self.replay_order,
            retry: RetryPolicy::default(),
        }
    }

    pub fn live_feed_config(&self) -> LiveFeedConfig {
        LiveFeedConfig {
            poll_interval: self.feed_poll_interval,
            window: self.backfill_window,
            retry: RetryPolicy::default(),
        }
    }

    pub fn yield_source(&self) -> Arc<dyn YieldSource> {
        build_yield_source(self.yield_source, self.markets.clone(), self.tokens())
    }
}

pub fn signer_from_env() -> Result<PrivateKeySigner> {
    let private_key = std::env::var(PRIVATE_KEY_ENV).map_err(|_| {
        anyhow::anyhow!("{PRIVATE_KEY_ENV} env var not set. Set it to the bot's hex private key.")
    })?;
    private_key
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {e}"))
}

pub fn api_key_from_env() -> Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => bail!("{API_KEY_ENV} env var not set."),
    }
}

pub fn build_yield_source(kind: YieldSourceKind, markets: Vec<Chain>, tokens: Vec<String>) -> Arc<dyn YieldSource> {
    match kind {
        YieldSourceKind::Aave => Arc::new(AaveReserveYields::new(markets, tokens)),
        YieldSourceKind::Defillama => Arc::new(DefiLlamaYields::new(markets, tokens)),
    }
}

/// Parse `TOKEN=0xADDRESS`.
pub fn parse_vault(spec: &str) -> Result<VaultContract> {
    let Some((token, address)) = spec.split_once('=') else {
        bail!("Invalid vault '{spec}'. Use TOKEN=0xADDRESS.");
    };
    let token = token.trim().to_uppercase();
    if token.is_empty() {
        bail!("Invalid vault '{spec}': empty token symbol.");
    }
    let address: Address = address
        .trim()
        .parse()
        .with_context(|| format!("Invalid vault address in '{spec}'"))?;
    Ok(VaultContract { token, address })
}

pub fn parse_markets(names: &[String]) -> Result<Vec<Chain>> {
    let mut markets = Vec::new();
    for name in names {
        let chain: Chain = name.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        if !markets.contains(&chain) {
            markets.push(chain);
        }
    }
    if markets.is_empty() {
        bail!("at least one --market is required");
    }
    Ok(markets)
}

/// Every vault token needs a lending market on the default chain and on each
/// configured market, otherwise its events could never be applied.
pub fn check_vault_markets(vaults: &[VaultContract], markets: &[Chain], default_chain: Chain) -> Result<()> {
    for vault in vaults {
        let missing: Vec<&str> = std::iter::once(&default_chain)
            .chain(markets)
            .filter(|chain| evm::token_address(**chain, &vault.token).is_none())
            .map(|chain| chain.name())
            .collect();
        if !missing.is_empty() {
            bail!(
                "vault token {} has no lending market on {}",
                vault.token,
                missing.join(", ")
            );
        }
    }
    Ok(())
}
