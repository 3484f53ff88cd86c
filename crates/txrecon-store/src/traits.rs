//! ItemStore trait: the abstract interface to the local transaction pool.

use async_trait::async_trait;
use bytes::Bytes;
use txrecon_core::{ItemId, PeerClock};

use crate::error::Result;

/// Result of inserting an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The item was new and was counted in this clock cell.
    Inserted { cell: usize },
    /// The item was already known (idempotent, not an error).
    AlreadyExists,
}

impl InsertResult {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertResult::Inserted { .. })
    }
}

/// Async interface to the authoritative set of pending items.
///
/// Every insert of a new item bumps the clock cell the item hashes to.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an item identifier.
    async fn insert_item(&self, item: ItemId) -> Result<InsertResult>;

    /// Insert full transaction bytes, keyed by their derived [`ItemId`].
    async fn insert_transaction(&self, tx: Bytes) -> Result<(ItemId, InsertResult)>;

    /// Transaction bytes for an item, if the store holds them.
    async fn get_transaction(&self, item: ItemId) -> Result<Option<Bytes>>;

    async fn contains(&self, item: ItemId) -> Result<bool>;

    /// Every item, in insertion order.
    async fn all_items(&self) -> Result<Vec<ItemId>>;

    /// Items that hash to a clock cell, in insertion order.
    async fn items_in_cell(&self, cell: usize) -> Result<Vec<ItemId>>;

    /// Snapshot of the local peer clock.
    async fn clock(&self) -> Result<PeerClock>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Extension trait for common store patterns.
pub trait ItemStoreExt: ItemStore {
    /// Insert many items, returning the ones that were new.
    fn insert_all(
        &self,
        items: &[ItemId],
    ) -> impl std::future::Future<Output = Result<Vec<ItemId>>> + Send;
}

impl<S: ItemStore + ?Sized> ItemStoreExt for S {
    async fn insert_all(&self, items: &[ItemId]) -> Result<Vec<ItemId>> {
        let mut added = Vec::new();
        for &item in items {
            if self.insert_item(item).await?.is_inserted() {
                added.push(item);
            }
        }
        Ok(added)
    }
}
