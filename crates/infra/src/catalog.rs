//! Administrative item actions: create, edit, delete, list.
//!
//! Stock movements never pass through here; they belong to
//! [`StockTransactionEngine`](crate::engine::StockTransactionEngine).

use std::sync::Arc;

use chrono::Utc;
use futures::TryStreamExt;
use thiserror::Error;
use tracing::{info, warn};

use stockwatch_core::{DomainError, ExpectedVersion, ItemId};
use stockwatch_inventory::{Item, ItemPatch, ItemQuery, NewItem, Page, Transaction};

use crate::store::{InventoryStore, ItemStore, StoreError, TransactionLog};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("item {0} not found")]
    NotFound(ItemId),

    /// Deletion denied: the transaction log still references the item.
    #[error("item {0} has recorded transactions and cannot be deleted")]
    ItemReferenced(ItemId),

    /// The item changed between read and write; re-read and retry.
    #[error("item {0} was modified concurrently")]
    Conflict(ItemId),

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

impl CatalogError {
    fn from_store(id: ItemId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CatalogError::NotFound(id),
            StoreError::Referenced(_) => CatalogError::ItemReferenced(id),
            StoreError::Conflict(_) => CatalogError::Conflict(id),
            other => CatalogError::Persistence(other),
        }
    }
}

#[derive(Debug)]
pub struct ItemCatalog<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for ItemCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> ItemCatalog<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_item(&self, new: NewItem) -> Result<Item, CatalogError> {
        let id = ItemId::new();
        let item = new.into_item(id, Utc::now())?;
        let created = self
            .store
            .insert(item)
            .await
            .map_err(|e| CatalogError::from_store(id, e))?;
        info!(item_id = %created.id, name = %created.name, "item created");
        Ok(created)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Item, CatalogError> {
        self.store
            .get(id)
            .await
            .map_err(|e| CatalogError::from_store(id, e))
    }

    /// Edit an item at the revision just read.
    ///
    /// A movement landing between the read and the write bumps the revision, so
    /// the edit fails with `Conflict` instead of overwriting that movement's stock.
    pub async fn update_item(&self, id: ItemId, patch: ItemPatch) -> Result<Item, CatalogError> {
        let current = self.get_item(id).await?;
        if patch.is_empty() {
            return Ok(current);
        }

        let edited = patch.apply(&current, Utc::now())?;
        let updated = self
            .store
            .replace(edited, ExpectedVersion::Exact(current.version))
            .await
            .map_err(|e| CatalogError::from_store(id, e))?;

        info!(item_id = %id, version = updated.version, "item updated");
        Ok(updated)
    }

    /// Delete an item that has never been moved.
    ///
    /// The store re-checks references when deleting, so a movement committed after
    /// the pre-check still blocks the delete.
    pub async fn delete_item(&self, id: ItemId) -> Result<(), CatalogError> {
        let current = self.get_item(id).await?;

        if self
            .store
            .has_transactions(id)
            .await
            .map_err(CatalogError::Persistence)?
        {
            warn!(item_id = %id, "refusing to delete item with recorded transactions");
            return Err(CatalogError::ItemReferenced(id));
        }

        self.store
            .delete(id, ExpectedVersion::Exact(current.version))
            .await
            .map_err(|e| CatalogError::from_store(id, e))?;

        info!(item_id = %id, "item deleted");
        Ok(())
    }

    pub async fn list_items(&self, query: &ItemQuery) -> Result<Page<Item>, CatalogError> {
        query.validate()?;
        ItemStore::list(&*self.store, query)
            .await
            .map_err(CatalogError::Persistence)
    }

    /// Items at or below their reorder point.
    pub async fn low_stock(&self) -> Result<Vec<Item>, CatalogError> {
        self.store
            .list_at_or_below_threshold()
            .try_collect()
            .await
            .map_err(CatalogError::Persistence)
    }

    pub async fn history(&self, id: ItemId) -> Result<Vec<Transaction>, CatalogError> {
        self.store
            .history(id)
            .await
            .map_err(CatalogError::Persistence)
    }

    pub async fn transactions(&self) -> Result<Vec<Transaction>, CatalogError> {
        TransactionLog::list(&*self.store)
            .await
            .map_err(CatalogError::Persistence)
    }
}
