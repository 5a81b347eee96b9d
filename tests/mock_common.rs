#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, address};
use anyhow::{Result, bail};
use async_trait::async_trait;

use vault_flow::engine::ledger::AllocationLedger;
use vault_flow::model::{Allocation, Amount, ApyEntry, BotState, Chain, EventId, EventKind, VaultEvent};
use vault_flow::run::state::{MemoryStateStore, StateStore, StoreError};
use vault_flow::venues::{
    AccountBalances, AllocationRecorder, CallExecutor, ExecutionError, ExecutionReceipt,
    LendingPosition, PositionReader, RetryPolicy, SupplyRequest, VaultContract, VaultEventSource,
    WithdrawRequest, YieldSource,
};

pub const USER: Address = address!("00000000000000000000000000000000000000aa");
pub const ACCOUNT: Address = address!("00000000000000000000000000000000000000bb");
pub const USDC_VAULT: Address = address!("c433DC0586EA17eDFA4B9Ea2987B3eAf177B50F4");
pub const USDT_VAULT: Address = address!("152Cf498fA14dB52D3e6797066C7D528e8023535");

// ── Executor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Supply(SupplyRequest),
    Withdraw(WithdrawRequest),
}

/// Records every call; the next `fail_*` calls of each kind fail.
/// Tokens in `unsupported` have no market anywhere. Each call takes `delay`.
#[derive(Default)]
pub struct MockExecutor {
    pub calls: Mutex<Vec<Call>>,
    pub fail_supply: AtomicU32,
    pub fail_withdraw: AtomicU32,
    pub unsupported: Mutex<Vec<String>>,
    pub delay: Mutex<Duration>,
    pub dry_run: AtomicBool,
}

impl MockExecutor {
    pub fn dry() -> Self {
        MockExecutor {
            dry_run: AtomicBool::new(true),
            ..MockExecutor::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn run(&self, call: Call, token: &str, chain: Chain, counter: &AtomicU32) -> Result<ExecutionReceipt, ExecutionError> {
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unsupported.lock().unwrap().iter().any(|t| t == token) {
            return Err(ExecutionError::UnsupportedMarket {
                token: token.to_string(),
                chain,
            });
        }
        if Self::take_failure(counter) {
            return Err(Self::failure());
        }
        let quote_id = (!self.dry_run.load(Ordering::SeqCst)).then(|| "mock-quote".to_string());
        Ok(ExecutionReceipt { quote_id })
    }

    fn failure() -> ExecutionError {
        ExecutionError::Failed {
            quote_id: "mock-quote".into(),
            status: "FAILED".into(),
        }
    }
}

#[async_trait]
impl CallExecutor for MockExecutor {
    async fn supply(&self, request: &SupplyRequest) -> Result<ExecutionReceipt, ExecutionError> {
        self.run(Call::Supply(request.clone()), &request.token, request.chain, &self.fail_supply)
            .await
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<ExecutionReceipt, ExecutionError> {
        self.run(Call::Withdraw(request.clone()), &request.token, request.chain, &self.fail_withdraw)
            .await
    }

    fn dry_run(&self) -> bool {
        self.dry_run.load(Ordering::SeqCst)
    }
}

// ── Balances, yields, recorder, positions ──────────────────────────

/// Same aggregated balance for every token.
pub struct MockBalances {
    pub balance: Mutex<Amount>,
    pub unavailable: AtomicBool,
}

impl MockBalances {
    pub fn new(balance: u64) -> Self {
        MockBalances {
            balance: Mutex::new(Amount::from(balance)),
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AccountBalances for MockBalances {
    async fn aggregated_balance(&self, _token: &str) -> Result<Amount> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("balance endpoint down");
        }
        Ok(*self.balance.lock().unwrap())
    }
}

#[derive(Default)]
pub struct MockYields {
    pub feed: Mutex<Vec<ApyEntry>>,
    pub unavailable: AtomicBool,
}

impl MockYields {
    pub fn new(feed: Vec<ApyEntry>) -> Self {
        MockYields {
            feed: Mutex::new(feed),
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl YieldSource for MockYields {
    async fn fetch_apys(&self) -> Result<Vec<ApyEntry>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("yield feed down");
        }
        Ok(self.feed.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockRecorder {
    pub calls: Mutex<Vec<(String, Chain, f64)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl AllocationRecorder for MockRecorder {
    async fn set_current_allocation(&self, token: &str, chain: Chain, apy: f64) -> Result<()> {
        self.calls.lock().unwrap().push((token.to_string(), chain, apy));
        if self.fail.load(Ordering::SeqCst) {
            bail!("vault write reverted");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPositions {
    pub positions: HashMap<String, Vec<LendingPosition>>,
    pub failing: Vec<String>,
}

#[async_trait]
impl PositionReader for MockPositions {
    async fn positions(&self, token: &str) -> Result<Vec<LendingPosition>> {
        if self.failing.iter().any(|t| t == token) {
            bail!("rpc down");
        }
        Ok(self.positions.get(token).cloned().unwrap_or_default())
    }
}

// ── Event source ────────────────────────────────────────────────────

/// Serves a fixed event list; windows listed in `failing` always error.
#[derive(Default)]
pub struct MockEventSource {
    pub head: AtomicU64,
    pub events: Mutex<Vec<VaultEvent>>,
    pub failing: Mutex<Vec<(u64, u64)>>,
    pub queries: Mutex<Vec<(String, u64, u64)>>,
}

impl MockEventSource {
    pub fn new(head: u64, events: Vec<VaultEvent>) -> Self {
        MockEventSource {
            head: AtomicU64::new(head),
            events: Mutex::new(events),
            ..MockEventSource::default()
        }
    }

    pub fn push(&self, event: VaultEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl VaultEventSource for MockEventSource {
    async fn chain_head(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn query_logs(&self, vault: &VaultContract, from: u64, to: u64) -> Result<Vec<VaultEvent>> {
        self.queries
            .lock()
            .unwrap()
            .push((vault.token.clone(), from, to));
        if self.failing.lock().unwrap().contains(&(from, to)) {
            bail!("query returned more than 10000 results");
        }
        let mut events: Vec<VaultEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.token == vault.token && (from..=to).contains(&e.block()))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }
}

/// Store whose writes fail once `broken` is set. Counts successful saves.
#[derive(Clone, Default)]
pub struct BreakableStore {
    pub inner: MemoryStateStore,
    pub broken: Arc<AtomicBool>,
    pub saves: Arc<AtomicU32>,
}

impl StateStore for BreakableStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        self.inner.load()
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(state)
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn deposit(token: &str, amount: u64, block: u64, log_index: u64) -> VaultEvent {
    event(EventKind::Deposit, token, amount, block, log_index)
}

pub fn withdrawal(token: &str, amount: u64, block: u64, log_index: u64) -> VaultEvent {
    event(EventKind::Withdraw, token, amount, block, log_index)
}

fn event(kind: EventKind, token: &str, amount: u64, block: u64, log_index: u64) -> VaultEvent {
    VaultEvent {
        kind,
        token: token.into(),
        user: USER,
        amount: Amount::from(amount),
        id: EventId { block, log_index },
    }
}

pub fn apy(chain: Chain, token: &str, apy: f64) -> ApyEntry {
    ApyEntry {
        protocol: "aave-v3".into(),
        chain,
        token_symbol: token.into(),
        apy,
    }
}

pub fn vaults() -> Vec<VaultContract> {
    vec![
        VaultContract {
            token: "USDC".into(),
            address: USDC_VAULT,
        },
        VaultContract {
            token: "USDT".into(),
            address: USDT_VAULT,
        },
    ]
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
    }
}

/// State at `block` with the given allocations.
pub fn state_with(block: u64, allocations: &[(&str, Allocation)]) -> BotState {
    let mut state = BotState::new(block);
    for (token, allocation) in allocations {
        state.allocations.insert(token.to_string(), allocation.clone());
    }
    state
}

pub fn allocation(amount: u64, at_apy: f64, chain: Chain) -> Allocation {
    Allocation {
        amount: Amount::from(amount),
        at_apy,
        chain,
    }
}

pub struct Harness {
    pub store: MemoryStateStore,
    pub executor: Arc<MockExecutor>,
    pub balances: Arc<MockBalances>,
}

impl Harness {
    pub fn new() -> Self {
        Harness::with_store(MemoryStateStore::new())
    }

    pub fn with_store(store: MemoryStateStore) -> Self {
        Harness::with_executor(store, MockExecutor::default())
    }

    pub fn with_executor(store: MemoryStateStore, executor: MockExecutor) -> Self {
        Harness {
            store,
            executor: Arc::new(executor),
            balances: Arc::new(MockBalances::new(u64::MAX)),
        }
    }

    /// Ledger tracking USDC and USDT, fresh state at block 100 unless the store holds one.
    pub fn ledger(&self) -> AllocationLedger {
        self.ledger_on(Box::new(self.store.clone()))
    }

    pub fn ledger_on(&self, store: Box<dyn StateStore>) -> AllocationLedger {
        AllocationLedger::load(
            store,
            100,
            ["USDC", "USDT"],
            Chain::Arbitrum,
            self.executor.clone(),
            self.balances.clone(),
        )
        .unwrap()
    }

    pub fn persisted(&self) -> BotState {
        self.store.snapshot().unwrap()
    }
}
