use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use crate::run::state::{JsonStateStore, StateStore};

pub fn run(state_file: &Path) -> Result<()> {
    let store = JsonStateStore::new(state_file);
    let Some(state) = store.load()? else {
        bail!(
            "No state file at {}. Run `vault-flow run` first.",
            state_file.display()
        );
    };

    println!("State file:  {}", state_file.display());
    println!("Watermark:   block {}", state.last_known_block);
    if let Some(updated) = state.updated_at.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)) {
        println!(
            "Updated:     {} ({} ago)",
            updated.format("%Y-%m-%d %H:%M:%S UTC"),
            format_duration(Utc::now().signed_duration_since(updated))
        );
    }
    if !state.applied_events.is_empty() {
        println!("Applied ids: {} at or above the watermark", state.applied_events.len());
    }
    println!();

    if state.allocations.is_empty() {
        println!("No allocations tracked.");
        return Ok(());
    }

    println!("{:<8} {:>24} {:>10} {}", "TOKEN", "AMOUNT", "APY", "CHAIN");
    println!("{}", "-".repeat(56));
    for (token, allocation) in &state.allocations {
        let apy = if allocation.is_inert() {
            "—".to_string()
        } else {
            format!("{:.3}%", allocation.at_apy)
        };
        println!(
            "{:<8} {:>24} {:>10} {}",
            token, allocation.amount, apy, allocation.chain
        );
    }

    let deployed = state.allocations.values().filter(|a| !a.is_inert()).count();
    println!("\n{} deployed, {} idle", deployed, state.allocations.len() - deployed);
    Ok(())
}

fn format_duration(dur: chrono::TimeDelta) -> String {
    let secs = dur.num_seconds();
    if secs < 0 {
        return "0m".to_string();
    }
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}
