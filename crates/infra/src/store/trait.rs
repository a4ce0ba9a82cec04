use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use stockwatch_core::{ExpectedVersion, ItemId};
use stockwatch_inventory::{Item, ItemQuery, Page, PendingTransaction, Transaction};

/// Store operation error.
///
/// These are **infrastructure errors** (availability, concurrency, integrity) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Optimistic check failed (stale stock value or revision).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record is still referenced by other records.
    #[error("record is referenced: {0}")]
    Referenced(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Item storage.
///
/// ## Mutation contract
///
/// `stock_level` is the contended resource. Stock movements change it only through
/// [`ItemStore::compare_and_set`]; administrative edits go through
/// [`ItemStore::replace`] with the revision they read. No operation overwrites
/// stock unconditionally, and every committed mutation bumps `version` by one.
///
/// Implementations must never hold a lock across an `.await`.
#[async_trait]
pub trait ItemStore: Send + Sync + 'static {
    /// Insert a new item. Fails with `Conflict` if the id already exists.
    async fn insert(&self, item: Item) -> Result<Item, StoreError>;

    /// Load one item. Fails with `NotFound` if absent.
    async fn get(&self, id: ItemId) -> Result<Item, StoreError>;

    /// Set `stock_level` to `new_stock` only if it currently equals `expected_stock`.
    ///
    /// Returns the committed item snapshot. A mismatch yields `Conflict`; the caller
    /// re-reads and re-validates before trying again.
    async fn compare_and_set(
        &self,
        id: ItemId,
        expected_stock: i64,
        new_stock: i64,
    ) -> Result<Item, StoreError>;

    /// Replace an item's editable fields if its revision matches `expected`.
    ///
    /// The stored revision becomes `current + 1` regardless of `item.version`.
    async fn replace(&self, item: Item, expected: ExpectedVersion) -> Result<Item, StoreError>;

    /// Delete an item if its revision matches `expected`.
    ///
    /// Stores that also hold the transaction log fail with `Referenced` while any
    /// record points at the item.
    async fn delete(&self, id: ItemId, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Filtered, sorted, paginated listing.
    async fn list(&self, query: &ItemQuery) -> Result<Page<Item>, StoreError>;

    /// All items with `stock_level <= reorder_point`.
    ///
    /// Each call starts a fresh scan; nothing is held between calls.
    fn list_at_or_below_threshold(&self) -> BoxStream<'_, Result<Item, StoreError>>;
}

/// Append-only transaction log.
///
/// Records are never updated or deleted. `append` must either durably store the
/// record or return an error; it never fails silently.
#[async_trait]
pub trait TransactionLog: Send + Sync + 'static {
    /// Append a record, assigning its id.
    async fn append(&self, pending: PendingTransaction) -> Result<Transaction, StoreError>;

    /// All records for one item, oldest first.
    async fn history(&self, item_id: ItemId) -> Result<Vec<Transaction>, StoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<Transaction>, StoreError>;

    /// Whether any record references the item.
    async fn has_transactions(&self, item_id: ItemId) -> Result<bool, StoreError>;
}

/// Items and their transaction log behind one commit boundary.
///
/// A stock movement is committed with [`InventoryStore::commit_movement`]: the
/// conditional stock update and the record append succeed together or not at all.
/// Nobody observes the new stock level before its record exists.
#[async_trait]
pub trait InventoryStore: ItemStore + TransactionLog {
    /// Set the item's stock to `new_stock` if it still equals `expected_stock`, and
    /// append `pending` in the same commit.
    ///
    /// A stock mismatch yields `Conflict` and nothing is written. Any other failure
    /// also leaves both the item and the log untouched.
    async fn commit_movement(
        &self,
        expected_stock: i64,
        new_stock: i64,
        pending: PendingTransaction,
    ) -> Result<(Item, Transaction), StoreError>;
}
