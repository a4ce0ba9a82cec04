use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use stockwatch_core::{ExpectedVersion, ItemId, TransactionId};
use stockwatch_inventory::{Item, ItemQuery, Page, PendingTransaction, Transaction};

use super::r#trait::{InventoryStore, ItemStore, StoreError, TransactionLog};

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct InventoryState {
    items: HashMap<ItemId, Item>,
    records: Vec<Transaction>,
}

impl InventoryState {
    /// Conditional stock write on the locked state.
    fn set_stock(
        &mut self,
        id: ItemId,
        expected_stock: i64,
        new_stock: i64,
    ) -> Result<Item, StoreError> {
        if new_stock < 0 {
            return Err(StoreError::Invalid(format!(
                "stock level cannot be negative ({new_stock})"
            )));
        }

        let current = self.items.get_mut(&id).ok_or(StoreError::NotFound)?;
        if current.stock_level != expected_stock {
            return Err(StoreError::Conflict(format!(
                "stock level changed (expected {expected_stock}, found {})",
                current.stock_level
            )));
        }

        *current = current.with_stock(new_stock, Utc::now());
        Ok(current.clone())
    }

    fn is_referenced(&self, id: ItemId) -> bool {
        self.records.iter().any(|t| t.item_id == id)
    }
}

/// In-memory items + transaction log.
///
/// Intended for tests/dev. Items and records share one lock, taken once per
/// operation and released before returning, so a movement's stock write and its
/// record land together.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<InventoryState>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transaction_count(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ItemStore for InMemoryInventoryStore {
    async fn insert(&self, item: Item) -> Result<Item, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("item {} already exists", item.id)));
        }
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: ItemId) -> Result<Item, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        state.items.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn compare_and_set(
        &self,
        id: ItemId,
        expected_stock: i64,
        new_stock: i64,
    ) -> Result<Item, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.set_stock(id, expected_stock, new_stock)
    }

    async fn replace(&self, item: Item, expected: ExpectedVersion) -> Result<Item, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let current = state.items.get_mut(&item.id).ok_or(StoreError::NotFound)?;

        if !expected.matches(current.version) {
            return Err(StoreError::Conflict(format!(
                "expected {expected:?}, found version {}",
                current.version
            )));
        }

        let next = Item {
            version: current.version + 1,
            created_at: current.created_at,
            ..item
        };
        *current = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: ItemId, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let current = state.items.get(&id).ok_or(StoreError::NotFound)?;

        if !expected.matches(current.version) {
            return Err(StoreError::Conflict(format!(
                "expected {expected:?}, found version {}",
                current.version
            )));
        }
        if state.is_referenced(id) {
            return Err(StoreError::Referenced(format!(
                "item {id} has recorded transactions"
            )));
        }

        state.items.remove(&id);
        Ok(())
    }

    async fn list(&self, query: &ItemQuery) -> Result<Page<Item>, StoreError> {
        let snapshot: Vec<Item> = {
            let state = self.state.read().map_err(|_| poisoned())?;
            state.items.values().cloned().collect()
        };
        query
            .run(snapshot)
            .map_err(|e| StoreError::Invalid(e.to_string()))
    }

    fn list_at_or_below_threshold(&self) -> BoxStream<'_, Result<Item, StoreError>> {
        let rows: Vec<Result<Item, StoreError>> = match self.state.read() {
            Ok(state) => {
                let mut low: Vec<Item> = state
                    .items
                    .values()
                    .filter(|i| i.is_low_stock())
                    .cloned()
                    .collect();
                low.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
                low.into_iter().map(Ok).collect()
            }
            Err(_) => vec![Err(poisoned())],
        };
        stream::iter(rows).boxed()
    }
}

#[async_trait]
impl TransactionLog for InMemoryInventoryStore {
    async fn append(&self, pending: PendingTransaction) -> Result<Transaction, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.items.contains_key(&pending.item_id) {
            return Err(StoreError::Referenced(format!(
                "item {} does not exist",
                pending.item_id
            )));
        }
        let tx = pending.assign(TransactionId::new());
        state.records.push(tx.clone());
        Ok(tx)
    }

    async fn history(&self, item_id: ItemId) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut history: Vec<Transaction> = state
            .records
            .iter()
            .filter(|t| t.item_id == item_id)
            .cloned()
            .collect();
        history.sort_by_key(|t| t.timestamp);
        Ok(history)
    }

    async fn list(&self) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut all = state.records.clone();
        all.sort_by_key(|t| t.timestamp);
        Ok(all)
    }

    async fn has_transactions(&self, item_id: ItemId) -> Result<bool, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.is_referenced(item_id))
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn commit_movement(
        &self,
        expected_stock: i64,
        new_stock: i64,
        pending: PendingTransaction,
    ) -> Result<(Item, Transaction), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let item = state.set_stock(pending.item_id, expected_stock, new_stock)?;
        let tx = pending.assign(TransactionId::new());
        state.records.push(tx.clone());
        Ok((item, tx))
    }
}
