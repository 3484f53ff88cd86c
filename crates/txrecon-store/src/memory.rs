//! In-memory implementation of the ItemStore trait.
//!
//! Pending pools are ephemeral, so this is the store nodes actually run
//! with. Readers share the lock; the single writer only appends.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use txrecon_core::{ItemId, PeerClock, ReconciliationConfig};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, ItemStore};

/// In-memory store. All data is lost when the store is dropped.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Items in insertion order.
    order: Vec<ItemId>,

    /// Membership index.
    known: HashSet<ItemId>,

    /// Clock cell -> items, in insertion order.
    cells: Vec<Vec<ItemId>>,

    /// Transaction bytes for items inserted as full transactions.
    payloads: HashMap<ItemId, Bytes>,

    clock: PeerClock,
}

impl MemoryStoreInner {
    fn insert(&mut self, item: ItemId) -> InsertResult {
        if !self.known.insert(item) {
            return InsertResult::AlreadyExists;
        }
        let cell = self.clock.increment(item);
        self.order.push(item);
        if let Some(bucket) = self.cells.get_mut(cell) {
            bucket.push(item);
        }
        InsertResult::Inserted { cell }
    }
}

impl MemoryStore {
    /// Create an empty store whose clock has `n_cells` cells.
    pub fn new(n_cells: usize, clock_seed: u64) -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                order: Vec::new(),
                known: HashSet::new(),
                cells: vec![Vec::new(); n_cells],
                payloads: HashMap::new(),
                clock: PeerClock::new(n_cells, clock_seed),
            }),
        }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self::new(config.n_cells, config.clock_seed)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_config(&ReconciliationConfig::default())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_item(&self, item: ItemId) -> Result<InsertResult> {
        let mut inner = self.write()?;
        Ok(inner.insert(item))
    }

    async fn insert_transaction(&self, tx: Bytes) -> Result<(ItemId, InsertResult)> {
        if tx.is_empty() {
            return Err(StoreError::InvalidData("empty transaction".into()));
        }
        let item = ItemId::from_tx_bytes(&tx);
        let mut inner = self.write()?;
        let result = inner.insert(item);
        inner.payloads.entry(item).or_insert(tx);
        Ok((item, result))
    }

    async fn get_transaction(&self, item: ItemId) -> Result<Option<Bytes>> {
        let inner = self.read()?;
        Ok(inner.payloads.get(&item).cloned())
    }

    async fn contains(&self, item: ItemId) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner.known.contains(&item))
    }

    async fn all_items(&self) -> Result<Vec<ItemId>> {
        let inner = self.read()?;
        Ok(inner.order.clone())
    }

    async fn items_in_cell(&self, cell: usize) -> Result<Vec<ItemId>> {
        let inner = self.read()?;
        Ok(inner.cells.get(cell).cloned().unwrap_or_default())
    }

    async fn clock(&self) -> Result<PeerClock> {
        let inner = self.read()?;
        Ok(inner.clock.clone())
    }

    async fn len(&self) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner.order.len())
    }
}
