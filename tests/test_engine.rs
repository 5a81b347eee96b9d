mod mock_common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;

use vault_flow::engine::decision::SkipReason;
use vault_flow::engine::ledger::AllocationLedger;
use vault_flow::engine::{EngineConfig, EngineError, ReallocationEngine};
use vault_flow::model::{Amount, ApyEntry, Chain, FeedItem};
use vault_flow::run::feed::{Disposition, FeedProcessor};
use vault_flow::run::shut_down;
use vault_flow::run::state::MemoryStateStore;
use vault_flow::venues::{SupplyRequest, WithdrawRequest};

use mock_common::*;

struct Setup {
    harness: Harness,
    ledger: Arc<Mutex<AllocationLedger>>,
    yields: Arc<MockYields>,
    recorder: Arc<MockRecorder>,
}

impl Setup {
    fn new(allocations: &[(&str, vault_flow::model::Allocation)], feed: Vec<ApyEntry>) -> Self {
        Setup::with_executor(allocations, feed, MockExecutor::default())
    }

    fn with_executor(
        allocations: &[(&str, vault_flow::model::Allocation)],
        feed: Vec<ApyEntry>,
        executor: MockExecutor,
    ) -> Self {
        let harness = Harness::with_executor(
            MemoryStateStore::with_state(state_with(100, allocations)),
            executor,
        );
        let ledger = Arc::new(Mutex::new(harness.ledger()));
        Setup {
            harness,
            ledger,
            yields: Arc::new(MockYields::new(feed)),
            recorder: Arc::new(MockRecorder::default()),
        }
    }

    fn engine(&self, enabled: &[&str], min_improvement_bps: f64) -> ReallocationEngine {
        ReallocationEngine::new(
            self.ledger.clone(),
            self.yields.clone(),
            self.harness.executor.clone(),
            self.recorder.clone(),
            ACCOUNT,
            enabled.iter().map(|t| t.to_string()),
            EngineConfig {
                poll_interval: Duration::from_millis(1),
                supply_failure_backoff: Duration::from_millis(1),
                min_improvement_bps,
            },
        )
    }
}

#[tokio::test]
async fn test_moves_to_better_market_once() {
    let s = Setup::new(
        &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        vec![apy(Chain::Polygon, "USDC", 3.0), apy(Chain::Optimism, "USDC", 6.0)],
    );
    let engine = s.engine(&["USDC"], 0.0);

    let report = engine.run_cycle().await.unwrap();
    assert_eq!(report.moved.len(), 1);

    assert_eq!(
        s.harness.executor.calls(),
        vec![
            Call::Withdraw(WithdrawRequest {
                token: "USDC".into(),
                chain: Chain::Polygon,
                amount: Amount::from(1_000_000u64),
                recipient: ACCOUNT,
            }),
            Call::Supply(SupplyRequest {
                token: "USDC".into(),
                chain: Chain::Optimism,
                amount: Amount::from(1_000_000u64),
            }),
        ]
    );
    assert_eq!(
        s.harness.persisted().allocations["USDC"],
        allocation(1_000_000, 6.0, Chain::Optimism)
    );
    assert_eq!(
        s.recorder.calls.lock().unwrap().clone(),
        vec![("USDC".to_string(), Chain::Optimism, 6.0)]
    );

    // Already on the best market: nothing further happens.
    let report = engine.run_cycle().await.unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(s.harness.executor.calls().len(), 2);
}

#[tokio::test]
async fn test_no_churn_when_current_market_is_best() {
    let s = Setup::new(
        &[("USDC", allocation(1_000_000, 5.0, Chain::Arbitrum))],
        vec![apy(Chain::Arbitrum, "USDC", 5.0), apy(Chain::Polygon, "USDC", 4.0)],
    );
    let engine = s.engine(&["USDC"], 0.0);

    let report = engine.run_cycle().await.unwrap();
    assert!(report.moved.is_empty());
    assert!(report.skipped.contains(&(
        "USDC".to_string(),
        SkipReason::AlreadyOnBest {
            chain: Chain::Arbitrum
        }
    )));
    assert!(s.harness.executor.calls().is_empty());
    assert!(s.recorder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inert_and_disabled_tokens_are_left_alone() {
    let s = Setup::new(
        &[
            ("USDC", allocation(0, 0.0, Chain::Arbitrum)),
            ("USDT", allocation(900, 1.0, Chain::Arbitrum)),
        ],
        vec![apy(Chain::Optimism, "USDC", 9.0), apy(Chain::Optimism, "USDT", 9.0)],
    );
    let engine = s.engine(&["USDC"], 0.0);

    let report = engine.run_cycle().await.unwrap();
    assert!(report.moved.is_empty());
    assert!(report.skipped.contains(&("USDC".to_string(), SkipReason::NothingDeployed)));
    assert!(report.skipped.contains(&("USDT".to_string(), SkipReason::NotEnabled)));
    assert!(s.harness.executor.calls().is_empty());
}

#[tokio::test]
async fn test_improvement_threshold_blocks_marginal_moves() {
    let s = Setup::new(
        &[("USDC", allocation(1_000, 4.0, Chain::Arbitrum))],
        vec![apy(Chain::Optimism, "USDC", 4.4)],
    );

    let report = s.engine(&["USDC"], 50.0).run_cycle().await.unwrap();
    assert!(report.moved.is_empty());
    assert!(s.harness.executor.calls().is_empty());

    let report = s.engine(&["USDC"], 30.0).run_cycle().await.unwrap();
    assert_eq!(report.moved.len(), 1);
}

#[tokio::test]
async fn test_supply_failure_after_withdraw_leaves_ledger_unchanged() {
    let s = Setup::new(
        &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 6.0)],
    );
    s.harness.executor.fail_supply.store(1, Ordering::SeqCst);
    let engine = s.engine(&["USDC"], 0.0);

    let report = engine.run_cycle().await.unwrap();
    assert!(report.moved.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(s.harness.executor.calls().len(), 2);
    assert_eq!(
        s.harness.persisted().allocations["USDC"],
        allocation(1_000_000, 3.0, Chain::Polygon)
    );
    assert!(s.recorder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_withdraw_failure_skips_supply() {
    let s = Setup::new(
        &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 6.0)],
    );
    s.harness.executor.fail_withdraw.store(1, Ordering::SeqCst);

    let report = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(s.harness.executor.calls().len(), 1);
    assert_eq!(s.harness.persisted().allocations["USDC"].chain, Chain::Polygon);
}

#[tokio::test]
async fn test_vault_write_failure_does_not_undo_move() {
    let s = Setup::new(
        &[("USDC", allocation(10, 3.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 6.0)],
    );
    s.recorder.fail.store(true, Ordering::SeqCst);

    let report = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap();
    assert_eq!(report.moved.len(), 1);
    assert_eq!(s.harness.persisted().allocations["USDC"].chain, Chain::Optimism);
}

#[tokio::test]
async fn test_tie_break_keeps_first_listed_market() {
    let s = Setup::new(
        &[("USDC", allocation(10, 1.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 5.0), apy(Chain::Arbitrum, "USDC", 5.0)],
    );

    let report = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap();
    assert_eq!(report.moved[0].to_chain, Chain::Optimism);
}

#[tokio::test]
async fn test_yield_feed_outage_is_reported() {
    let s = Setup::new(
        &[("USDC", allocation(10, 1.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 5.0)],
    );
    s.yields.unavailable.store(true, Ordering::SeqCst);

    let err = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap_err();
    assert!(matches!(err, EngineError::Yields(_)));
    assert!(s.harness.executor.calls().is_empty());
}

#[tokio::test]
async fn test_missing_yield_data_skips_token() {
    let s = Setup::new(
        &[("USDC", allocation(10, 1.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDT", 5.0)],
    );

    let report = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap();
    assert!(report.skipped.contains(&("USDC".to_string(), SkipReason::NoYieldData)));
}

#[tokio::test]
async fn test_dry_run_skips_vault_write_and_persistence() {
    let s = Setup::with_executor(
        &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 6.0)],
        MockExecutor::dry(),
    );

    let report = s.engine(&["USDC"], 0.0).run_cycle().await.unwrap();
    assert_eq!(report.moved.len(), 1);
    assert!(s.recorder.calls.lock().unwrap().is_empty());
    assert_eq!(
        s.harness.persisted().allocations["USDC"],
        allocation(1_000_000, 3.0, Chain::Polygon)
    );
}

fn slow_executor() -> MockExecutor {
    let executor = MockExecutor::default();
    *executor.delay.lock().unwrap() = Duration::from_millis(20);
    executor
}

#[tokio::test]
async fn test_live_deposit_during_reallocation_is_not_lost() {
    let s = Setup::with_executor(
        &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        vec![apy(Chain::Optimism, "USDC", 6.0)],
        slow_executor(),
    );
    let engine = s.engine(&["USDC"], 0.0);
    let mut processor = FeedProcessor::new(s.ledger.clone());

    let (report, disposition) = tokio::join!(
        engine.run_cycle(),
        processor.handle(FeedItem::Event(deposit("USDC", 500, 101, 0)))
    );
    assert_eq!(report.unwrap().moved.len(), 1);
    assert_eq!(disposition.unwrap(), Some(Disposition::Applied));

    let record = s.harness.persisted().allocations["USDC"].clone();
    assert_eq!(record.chain, Chain::Optimism);
    assert_eq!(record.amount, Amount::from(1_000_500u64));
    // Withdraw, supply for the move, supply for the deposit.
    assert_eq!(s.harness.executor.calls().len(), 3);
}

#[tokio::test]
async fn test_shutdown_waits_for_move_and_commits() {
    let harness = Harness::with_executor(MemoryStateStore::new(), slow_executor());
    let store = BreakableStore {
        inner: MemoryStateStore::with_state(state_with(
            100,
            &[("USDC", allocation(1_000_000, 3.0, Chain::Polygon))],
        )),
        ..BreakableStore::default()
    };
    let ledger = Arc::new(Mutex::new(harness.ledger_on(Box::new(store.clone()))));
    let engine = Arc::new(ReallocationEngine::new(
        ledger.clone(),
        Arc::new(MockYields::new(vec![apy(Chain::Optimism, "USDC", 6.0)])),
        harness.executor.clone(),
        Arc::new(MockRecorder::default()),
        ACCOUNT,
        ["USDC".to_string()],
        EngineConfig {
            poll_interval: Duration::from_millis(1),
            supply_failure_backoff: Duration::from_millis(1),
            min_improvement_bps: 0.0,
        },
    ));
    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_forever().await })
    };
    let processor = FeedProcessor::new(ledger.clone());

    // Let the engine start its withdraw.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let saves_before = store.saves.load(Ordering::SeqCst);
    shut_down(&processor, &ledger, &engine_task, None).await.unwrap();

    let saved = store.inner.snapshot().unwrap();
    assert_eq!(saved.allocations["USDC"], allocation(1_000_000, 6.0, Chain::Optimism));
    assert_eq!(harness.executor.calls().len(), 2);
    // The recorded move and the final commit.
    assert!(store.saves.load(Ordering::SeqCst) >= saves_before + 2);
    assert!(engine_task.await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_shutdown_reports_failed_final_commit() {
    let harness = Harness::new();
    let store = BreakableStore::default();
    let ledger = Arc::new(Mutex::new(harness.ledger_on(Box::new(store.clone()))));
    let engine_task = tokio::spawn(async { Ok::<(), EngineError>(()) });
    let processor = FeedProcessor::new(ledger.clone());

    store.broken.store(true, Ordering::SeqCst);
    assert!(shut_down(&processor, &ledger, &engine_task, None).await.is_err());
}
