use anyhow::{Context, Result};

use crate::cli::YieldSourceKind;
use crate::model::apy::best_apy_per_token;
use crate::run::config::{build_yield_source, parse_markets};

pub fn run(markets: &[String], source: YieldSourceKind, tokens: &[String]) -> Result<()> {
    let markets = parse_markets(markets)?;
    let tokens: Vec<String> = tokens.iter().map(|t| t.to_uppercase()).collect();
    let source = build_yield_source(source, markets, tokens);

    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    let feed = rt.block_on(source.fetch_apys())?;

    if feed.is_empty() {
        println!("No yields reported.");
        return Ok(());
    }

    println!("{:<8} {:<10} {:<10} {:>9}", "TOKEN", "CHAIN", "PROTOCOL", "APY");
    println!("{}", "-".repeat(40));
    for entry in &feed {
        println!(
            "{:<8} {:<10} {:<10} {:>8.3}%",
            entry.token_symbol, entry.chain, entry.protocol, entry.apy
        );
    }

    println!();
    for best in best_apy_per_token(&feed) {
        println!("Best {}: {} at {:.3}%", best.token_symbol, best.chain, best.apy);
    }
    Ok(())
}
