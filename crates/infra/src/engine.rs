//! Stock transaction engine.
//!
//! `apply_movement` is the only way stock changes as the result of a movement:
//!
//! ```text
//! Movement
//!   ↓
//! 1. Validate quantity
//!   ↓
//! 2. Read item, compute new stock (OUT may not go below zero)
//!   ↓
//! 3. commit_movement(expected = stock read in 2, record)   ── conflict → back to 2
//!      stock update + transaction append in one commit
//!   ↓
//! 4. new stock <= reorder point → alert (best-effort, bounded)
//! ```
//!
//! There is no global lock: concurrent movements on one item serialize through the
//! compare-and-set retry loop, movements on different items never contend.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockwatch_core::{DomainError, ItemId, UserId};
use stockwatch_inventory::{
    Alert, Item, Movement, MovementType, PendingTransaction, Quantity, Transaction,
};

use crate::alerts::AlertDispatcher;
use crate::config::EngineConfig;
use crate::store::{InventoryStore, StoreError};

#[derive(Debug, Error)]
pub enum MovementError {
    /// Quantity was zero or negative.
    #[error("quantity must be > 0 (got {0})")]
    InvalidQuantity(i64),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        available: i64,
        requested: i64,
    },

    /// Storage failed or stayed conflicted beyond the retry budget. Nothing was committed.
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

/// Result of a committed movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementReceipt {
    pub transaction: Transaction,
    /// Item snapshot right after the movement committed.
    pub item: Item,
    /// Whether the movement left the item at or below its reorder point.
    pub reorder_alert: bool,
}

/// Coordinates stock movements across the inventory store and alerts.
#[derive(Debug)]
pub struct StockTransactionEngine<S: ?Sized> {
    store: Arc<S>,
    alerts: AlertDispatcher,
    config: EngineConfig,
}

impl<S: ?Sized> Clone for StockTransactionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            alerts: self.alerts.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> StockTransactionEngine<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>, alerts: AlertDispatcher, config: EngineConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a stock increase.
    pub async fn stock_in(
        &self,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<MovementReceipt, MovementError> {
        self.apply_movement(item_id, MovementType::In, quantity, None)
            .await
    }

    /// Record a stock decrease.
    pub async fn stock_out(
        &self,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<MovementReceipt, MovementError> {
        self.apply_movement(item_id, MovementType::Out, quantity, None)
            .await
    }

    /// Apply one movement atomically: either the stock change and its transaction
    /// record are both committed, or neither is.
    pub async fn apply_movement(
        &self,
        item_id: ItemId,
        kind: MovementType,
        quantity: i64,
        performed_by: Option<UserId>,
    ) -> Result<MovementReceipt, MovementError> {
        let quantity =
            Quantity::new(quantity).map_err(|_| MovementError::InvalidQuantity(quantity))?;
        let movement = Movement {
            item_id,
            kind,
            quantity,
            performed_by,
        };

        let (updated, transaction) = self.commit(&movement).await?;

        info!(
            item_id = %item_id,
            transaction_id = %transaction.id,
            kind = %kind,
            quantity = quantity.get(),
            stock_level = updated.stock_level,
            "stock movement committed"
        );

        let reorder_alert = updated.is_low_stock();
        if reorder_alert {
            self.raise_reorder_alert(&updated).await;
        }

        Ok(MovementReceipt {
            transaction,
            item: updated,
            reorder_alert,
        })
    }

    /// Validate-and-commit loop. Every conflict re-reads the item and re-validates.
    async fn commit(&self, movement: &Movement) -> Result<(Item, Transaction), MovementError> {
        let item_id = movement.item_id;

        for attempt in 0..=self.config.max_conflict_retries {
            let item = self.store.get(item_id).await.map_err(|e| match e {
                StoreError::NotFound => MovementError::ItemNotFound(item_id),
                other => MovementError::Persistence(other),
            })?;

            let new_stock = movement
                .kind
                .apply_to(item.stock_level, movement.quantity)
                .map_err(|e| match e {
                    DomainError::InsufficientStock {
                        available,
                        requested,
                    } => MovementError::InsufficientStock {
                        item_id,
                        available,
                        requested,
                    },
                    other => MovementError::Persistence(StoreError::Invalid(other.to_string())),
                })?;

            let pending = PendingTransaction::for_movement(movement, Utc::now());
            match self
                .store
                .commit_movement(item.stock_level, new_stock, pending)
                .await
            {
                Ok(committed) => return Ok(committed),
                Err(StoreError::Conflict(reason)) => {
                    debug!(item_id = %item_id, attempt, %reason, "stock changed concurrently; retrying");
                    tokio::task::yield_now().await;
                }
                Err(StoreError::NotFound) => return Err(MovementError::ItemNotFound(item_id)),
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "stock movement not committed");
                    return Err(MovementError::Persistence(e));
                }
            }
        }

        warn!(
            item_id = %item_id,
            retries = self.config.max_conflict_retries,
            "stock movement gave up after repeated conflicts"
        );
        Err(MovementError::Persistence(StoreError::Conflict(format!(
            "item {item_id} still contended after {} retries",
            self.config.max_conflict_retries
        ))))
    }

    async fn raise_reorder_alert(&self, item: &Item) {
        let alert = Alert::reorder(item);
        warn!(
            item_id = %item.id,
            stock_level = item.stock_level,
            reorder_point = item.reorder_point,
            "{}",
            alert.body
        );

        if self.config.detach_alerts {
            self.alerts.dispatch(alert);
        } else {
            // Failures are already logged by the dispatcher.
            let _ = self.alerts.deliver(alert).await;
        }
    }
}
