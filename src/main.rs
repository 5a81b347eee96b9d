use clap::Parser;
use tracing_subscriber::EnvFilter;

use vault_flow::{account, cli, run, status, yields};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vault_flow=debug")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Run(args) => run::run(&args),
        cli::Command::Status { state_file } => status::run(&state_file),
        cli::Command::Yields {
            markets,
            yield_source,
            tokens,
        } => yields::run(&markets, yield_source, &tokens),
        cli::Command::Account { tokens } => account::run(&tokens),
    }
}
