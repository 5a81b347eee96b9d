use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::run::backfill::ReplayOrder;

/// Vault yield reallocator: tracks what each token vault has deployed to
/// Aave and moves it to the best-yielding chain.
#[derive(Parser)]
#[command(name = "vault-flow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the bot: backfill missed vault events, follow new ones, reallocate
    Run(RunArgs),

    /// Print the persisted watermark and allocations
    Status {
        /// Path to the bot state file
        #[arg(long, default_value = "bot-state.json")]
        state_file: PathBuf,
    },

    /// Fetch current yields and print the best market per token
    Yields {
        /// Market chains to consider (repeatable)
        #[arg(long = "market", default_values = ["polygon", "arbitrum", "optimism"])]
        markets: Vec<String>,

        /// Where yields come from
        #[arg(long, value_enum, default_value_t = YieldSourceKind::Aave)]
        yield_source: YieldSourceKind,

        /// Tokens to report (repeatable)
        #[arg(long = "token", default_values = ["USDC", "USDT"])]
        tokens: Vec<String>,
    },

    /// Print the predicted aggregated account and its balances
    Account {
        /// Tokens to report (repeatable)
        #[arg(long = "token", default_values = ["USDC", "USDT"])]
        tokens: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YieldSourceKind {
    /// `getReserveData` on each market's Aave V3 pool
    Aave,
    /// yields.llama.fi pool list
    Defillama,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to state file for persistence across restarts
    #[arg(long, default_value = "bot-state.json")]
    pub state_file: PathBuf,

    /// Block to start from when no state file exists
    #[arg(long, default_value = "353872007")]
    pub start_block: u64,

    /// Token vault as TOKEN=0xADDRESS (repeatable, defaults to the built-in vaults)
    #[arg(long = "vault")]
    pub vaults: Vec<String>,

    /// RPC endpoint of the chain the vaults live on (overrides VAULT_RPC_URL)
    #[arg(long)]
    pub vault_rpc_url: Option<String>,

    /// Market chains to allocate across (repeatable)
    #[arg(long = "market", default_values = ["polygon", "arbitrum", "optimism"])]
    pub markets: Vec<String>,

    /// Where yields come from
    #[arg(long, value_enum, default_value_t = YieldSourceKind::Aave)]
    pub yield_source: YieldSourceKind,

    /// Seconds between reallocation cycles
    #[arg(long, default_value = "60")]
    pub poll_secs: u64,

    /// Seconds between live event polls
    #[arg(long, default_value = "5")]
    pub feed_poll_secs: u64,

    /// Blocks per log query
    #[arg(long, default_value = "500")]
    pub backfill_window: u64,

    /// Order in which backfilled events are applied
    #[arg(long, value_enum, default_value_t = ReplayOrder::Chronological)]
    pub replay_order: ReplayOrder,

    /// Extra yield (basis points) a market must offer before funds move
    #[arg(long, default_value = "0")]
    pub min_improvement_bps: f64,

    /// Prepare quotes without signing or executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Backfill, run one reallocation cycle, then exit (for external cron)
    #[arg(long)]
    pub once: bool,
}
