use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::model::{Allocation, BotState, BotStatePatch, Chain};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable backend for [`BotState`]. Each `save` replaces the whole record.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<BotState>, StoreError>;

    fn save(&self, state: &BotState) -> Result<(), StoreError>;
}

/// JSON file store, written atomically (tmp file then rename).
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonStateStore { path: path.into() }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let state = serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

/// In-memory store. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<BotState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        MemoryStateStore::default()
    }

    pub fn with_state(state: BotState) -> Self {
        MemoryStateStore {
            slot: Arc::new(Mutex::new(Some(state))),
        }
    }

    /// Last saved snapshot.
    pub fn snapshot(&self) -> Option<BotState> {
        self.slot.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &BotState) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(state.clone());
        }
        Ok(())
    }
}

/// Read-through/write-through view of the persisted [`BotState`].
///
/// Every mutation is followed by a whole-record save, so a reader always sees
/// the most recently completed write. No concurrent writers: callers serialize
/// access upstream.
///
/// A detached view keeps mutating in memory but never saves again.
pub struct PersistentState {
    store: Box<dyn StateStore>,
    state: BotState,
    detached: bool,
}

impl PersistentState {
    /// Load from the store, or start fresh at `start_block`.
    /// A store that cannot be read is fatal: the watermark would be unknown.
    pub fn open(store: Box<dyn StateStore>, start_block: u64) -> Result<Self, StoreError> {
        let state = match store.load()? {
            Some(state) => {
                info!(
                    last_known_block = state.last_known_block,
                    tokens = state.allocations.len(),
                    "loaded bot state"
                );
                state
            }
            None => {
                info!(start_block, "no persisted state, starting fresh");
                BotState::new(start_block)
            }
        };
        Ok(PersistentState {
            store,
            state,
            detached: false,
        })
    }

    /// Stop writing to the store. Used for dry runs, where the record is
    /// built on calls that never executed.
    pub fn detach(&mut self) {
        if !self.detached {
            info!("state store detached, changes stay in memory");
        }
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Seed a zero allocation for every token not already tracked.
    /// Existing allocations are never overwritten.
    pub fn initialize<'a>(
        &mut self,
        tokens: impl IntoIterator<Item = &'a str>,
        default_chain: Chain,
    ) -> Result<(), StoreError> {
        for token in tokens {
            self.state
                .allocations
                .entry(token.to_string())
                .or_insert_with(|| Allocation::empty(default_chain));
        }
        self.commit()
    }

    pub fn get_state(&self) -> &BotState {
        &self.state
    }

    pub fn set_state(&mut self, patch: BotStatePatch) -> Result<(), StoreError> {
        if let Some(block) = patch.last_known_block {
            self.state.last_known_block = block;
        }
        if let Some(allocations) = patch.allocations {
            self.state.allocations = allocations;
        }
        self.commit()
    }

    pub fn get_allocation(&self, token: &str) -> Option<&Allocation> {
        self.state.allocations.get(token)
    }

    pub fn set_allocation(&mut self, token: &str, allocation: Allocation) -> Result<(), StoreError> {
        self.state.allocations.insert(token.to_string(), allocation);
        self.commit()
    }

    pub fn set_last_known_block(&mut self, block: u64) -> Result<(), StoreError> {
        self.state.last_known_block = block;
        self.commit()
    }

    pub fn applied_events(&self) -> &BTreeSet<crate::model::EventId> {
        &self.state.applied_events
    }

    /// Mutate the in-memory record without saving. Pair with [`commit`](Self::commit)
    /// so several fields land in one write.
    pub fn stage(&mut self) -> &mut BotState {
        &mut self.state
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.state.updated_at = Some(chrono::Utc::now().timestamp());
        if self.detached {
            return Ok(());
        }
        self.store.save(&self.state)
    }
}
