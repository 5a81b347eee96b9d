pub mod backfill;
pub mod config;
pub mod feed;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::engine::ledger::AllocationLedger;
use crate::engine::{EngineError, ReallocationEngine};
use crate::model::{Chain, FeedItem};
use crate::venues::lending::AavePositions;
use crate::venues::onebalance::types::EvmAccount;
use crate::venues::onebalance::{AggregatedBalances, ExecutorTiming, OneBalanceClient, OneBalanceExecutor};
use crate::venues::vault::{EvmVaultSource, VaultAllocationWriter};
use crate::venues::{CallExecutor, VaultEventSource};

use backfill::backfill;
use config::RuntimeConfig;
use feed::{FeedProcessor, run_live_feed};
use state::JsonStateStore;

/// Market that receives a new token's first deposit.
pub const DEFAULT_CHAIN: Chain = Chain::Arbitrum;

/// Entry point for the `run` command.
pub fn run(args: &RunArgs) -> Result<()> {
    let config = RuntimeConfig::from_cli(args)?;

    println!("=== vault-flow run ===");
    println!("Wallet:     {:?}", config.wallet_address);
    for vault in &config.vaults {
        println!("Vault:      {} {:?}", vault.token, vault.address);
    }
    let markets: Vec<&str> = config.markets.iter().map(|c| c.name()).collect();
    println!("Markets:    {}", markets.join(", "));
    println!("Yields:     {:?}", config.yield_source);
    println!("State file: {}", config.state_file.display());
    println!("Dry run:    {}", config.dry_run);
    println!("Once:       {}", config.once);
    println!();

    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    rt.block_on(run_async(config))
}

async fn run_async(config: RuntimeConfig) -> Result<()> {
    let client = OneBalanceClient::new(&config.api_key)?;
    let account_address = client
        .predict_address(config.wallet_address, config.wallet_address)
        .await
        .context("predicting aggregated account address")?;
    info!(account = %account_address, "aggregated account");

    let account = EvmAccount {
        account_address,
        session_address: config.wallet_address,
        admin_address: config.wallet_address,
    };
    let executor: Arc<dyn CallExecutor> = Arc::new(OneBalanceExecutor::new(
        Arc::new(client.clone()),
        config.signer.clone(),
        account,
        ExecutorTiming::default(),
        config.dry_run,
    ));
    let balances = Arc::new(AggregatedBalances::new(client, account_address));

    let tokens = config.tokens();
    let mut ledger = AllocationLedger::load(
        Box::new(JsonStateStore::new(&config.state_file)),
        config.start_block,
        tokens.iter().map(String::as_str),
        DEFAULT_CHAIN,
        executor.clone(),
        balances,
    )
    .context("loading bot state")?;

    let positions = AavePositions::new(config.markets.clone(), account_address);
    ledger
        .reconcile_from_chain(&positions)
        .await
        .context("reconciling allocations")?;
    let watermark = ledger.last_known_block();
    let ledger = Arc::new(Mutex::new(ledger));

    let source: Arc<dyn VaultEventSource> = Arc::new(EvmVaultSource::new(&config.vault_rpc_url)?);
    let head = source.chain_head().await.context("reading vault chain head")?;

    // Live events after `head` queue up in the channel while the backfill runs.
    let (tx, mut rx) = mpsc::channel::<FeedItem>(1024);
    let feed_task = if config.once {
        drop(tx);
        None
    } else {
        Some(tokio::spawn(run_live_feed(
            source.clone(),
            config.vaults.clone(),
            head,
            config.live_feed_config(),
            tx,
        )))
    };

    let mut processor = FeedProcessor::new(ledger.clone());
    backfill(
        &mut processor,
        source.as_ref(),
        &config.vaults,
        watermark,
        head,
        &config.backfill_config(),
    )
    .await
    .context("backfilling vault events")?;

    let recorder = Arc::new(VaultAllocationWriter::new(
        config.signer.clone(),
        &config.vault_rpc_url,
        &config.vaults,
    ));
    let engine = Arc::new(ReallocationEngine::new(
        ledger.clone(),
        config.yield_source(),
        executor,
        recorder,
        account_address,
        tokens,
        config.engine_config(),
    ));

    if config.once {
        println!("── Single pass (--once) ──");
        let report = engine.run_cycle().await?;
        for decision in &report.moved {
            println!(
                "  Moved {} {} from {} to {} ({:.3}% -> {:.3}%)",
                decision.amount,
                decision.token,
                decision.from_chain,
                decision.to_chain,
                decision.from_apy,
                decision.target_apy
            );
        }
        for (token, reason) in &report.skipped {
            println!("  {token}: {reason}");
        }
        for (token, err) in &report.failed {
            println!("  {token}: FAILED {err}");
        }
        ledger.lock().await.commit()?;
        if config.dry_run {
            println!("Dry run: state file left untouched. Exiting.");
        } else {
            println!("State saved. Exiting.");
        }
        return Ok(());
    }

    println!("── Daemon mode ──");
    let mut engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_forever().await })
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            item = rx.recv() => {
                let Some(item) = item else {
                    break Err(anyhow::anyhow!("live feed stopped"));
                };
                if let Err(e) = processor.handle(item).await {
                    error!(error = %e, "state write failed, stopping");
                    break Err(e.into());
                }
            }
            joined = &mut engine_task => {
                break match joined {
                    Ok(Err(EngineError::Store(e))) => Err(anyhow::Error::new(e).context("reallocation engine")),
                    Ok(res) => res.map_err(Into::into),
                    Err(e) => Err(anyhow::Error::new(e).context("reallocation engine panicked")),
                };
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
        }
    };

    shut_down(&processor, &ledger, &engine_task, feed_task).await?;
    result
}

/// Stop the feed and engine tasks and commit the final state.
///
/// The ledger lock is taken before the engine is aborted, so a move already
/// under way completes and is recorded first.
pub async fn shut_down(
    processor: &FeedProcessor,
    ledger: &Mutex<AllocationLedger>,
    engine_task: &JoinHandle<Result<(), EngineError>>,
    feed_task: Option<JoinHandle<()>>,
) -> Result<()> {
    if let Some(task) = feed_task {
        task.abort();
    }
    let mut guard = ledger.lock().await;
    engine_task.abort();
    let parked = processor.parked().count();
    if parked > 0 {
        warn!(parked, halted = ?processor.halted_tokens(), "exiting with unapplied events, they replay on next start");
    }
    guard.commit().context("saving final state")?;
    info!("state saved");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
