use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::model::{EventKind, FeedItem, VaultEvent};
use crate::run::feed::{Disposition, FeedProcessor};
use crate::run::state::StoreError;
use crate::venues::{RetryPolicy, VaultContract, VaultEventSource, retry};

/// Order in which a replayed range is handed to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReplayOrder {
    /// Strict `(block, log_index)` order.
    #[default]
    Chronological,
    /// Every deposit of the range before any withdrawal.
    DepositsFirst,
}

/// Events found in a range plus the windows that could not be read.
#[derive(Debug, Default)]
pub struct RangeScan {
    pub events: Vec<VaultEvent>,
    /// Inclusive `(start, end)` block windows whose query failed after retries.
    pub failed_windows: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    pub window: u64,
    pub order: ReplayOrder,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub applied: usize,
    pub duplicates: usize,
    pub parked: usize,
    pub rejected: usize,
    pub failed_windows: usize,
}

/// Split `from..=to` into inclusive windows of at most `size` blocks.
pub fn generate_windows(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    if from > to {
        return Vec::new();
    }
    let size = size.max(1);
    let mut windows = Vec::new();
    let mut start = from;
    loop {
        let end = start.saturating_add(size - 1).min(to);
        windows.push((start, end));
        if end == to {
            break;
        }
        start = end + 1;
    }
    windows
}

/// Query every vault over `from..=to`, window by window, with per-window retry.
pub async fn scan_range(
    source: &dyn VaultEventSource,
    vaults: &[VaultContract],
    from: u64,
    to: u64,
    window: u64,
    order: ReplayOrder,
    policy: RetryPolicy,
) -> RangeScan {
    let mut scan = RangeScan::default();

    for (start, end) in generate_windows(from, to, window) {
        for vault in vaults {
            let result = retry(policy, || source.query_logs(vault, start, end)).await;
            match result {
                Ok(events) => scan.events.extend(events),
                Err(e) => {
                    warn!(
                        token = %vault.token,
                        from = start,
                        to = end,
                        error = %format!("{e:#}"),
                        "log window query failed"
                    );
                    if !scan.failed_windows.contains(&(start, end)) {
                        scan.failed_windows.push((start, end));
                    }
                }
            }
        }
    }

    match order {
        ReplayOrder::Chronological => scan.events.sort_by_key(|e| e.id),
        ReplayOrder::DepositsFirst => {
            scan.events
                .sort_by_key(|e| (e.kind != EventKind::Deposit, e.id));
        }
    }
    scan
}

/// Replay `from..=to` through the processor, then tick `Block(to)`.
///
/// A window that could not be read caps the watermark just before it for the
/// rest of the run, so the next start replays it.
pub async fn backfill(
    processor: &mut FeedProcessor,
    source: &dyn VaultEventSource,
    vaults: &[VaultContract],
    from: u64,
    to: u64,
    config: &BackfillConfig,
) -> Result<BackfillReport, StoreError> {
    let mut report = BackfillReport::default();
    if from >= to {
        info!(watermark = from, head = to, "no backfill needed");
        return Ok(report);
    }
    info!(from, to, blocks = to - from + 1, order = ?config.order, "backfilling vault events");

    let scan = scan_range(source, vaults, from, to, config.window, config.order, config.retry).await;
    for event in scan.events {
        match processor.handle(FeedItem::Event(event)).await? {
            Some(Disposition::Applied) => report.applied += 1,
            Some(Disposition::Duplicate) => report.duplicates += 1,
            Some(Disposition::Parked) => report.parked += 1,
            Some(Disposition::Rejected) => report.rejected += 1,
            None => {}
        }
    }

    report.failed_windows = scan.failed_windows.len();
    if let Some(start) = scan.failed_windows.iter().map(|w| w.0).min() {
        error!(
            from = start,
            windows = report.failed_windows,
            "backfill windows unreadable, watermark capped until restart"
        );
        processor.set_ceiling(start.saturating_sub(1));
    }
    processor.handle(FeedItem::Block(to)).await?;

    info!(
        applied = report.applied,
        duplicates = report.duplicates,
        parked = report.parked,
        rejected = report.rejected,
        "backfill complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_windows() {
        assert_eq!(generate_windows(100, 100, 500), vec![(100, 100)]);
        assert_eq!(
            generate_windows(0, 1_200, 500),
            vec![(0, 499), (500, 999), (1_000, 1_200)]
        );
        assert_eq!(generate_windows(10, 19, 5), vec![(10, 14), (15, 19)]);
        assert!(generate_windows(20, 10, 5).is_empty());
    }

    #[test]
    fn test_zero_window_size_is_treated_as_one() {
        assert_eq!(generate_windows(1, 3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_windows_reach_u64_max() {
        let windows = generate_windows(u64::MAX - 3, u64::MAX, 2);
        assert_eq!(windows, vec![(u64::MAX - 3, u64::MAX - 2), (u64::MAX - 1, u64::MAX)]);
    }
}
