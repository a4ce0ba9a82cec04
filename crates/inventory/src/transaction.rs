//! Immutable audit records of committed stock movements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockwatch_core::{ItemId, TransactionId, UserId};

use crate::movement::{Movement, MovementType, Quantity};

/// A transaction ready to be appended to the log (not yet assigned an id).
///
/// The log assigns the id during append and hands back a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub item_id: ItemId,
    #[serde(rename = "type")]
    pub kind: MovementType,
    pub quantity: Quantity,
    pub performed_by: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn for_movement(movement: &Movement, timestamp: DateTime<Utc>) -> Self {
        Self {
            item_id: movement.item_id,
            kind: movement.kind,
            quantity: movement.quantity,
            performed_by: movement.performed_by,
            timestamp,
        }
    }

    /// Seal the record with the id assigned by the log.
    pub fn assign(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            item_id: self.item_id,
            kind: self.kind,
            quantity: self.quantity,
            performed_by: self.performed_by,
            timestamp: self.timestamp,
        }
    }
}

/// A stored stock transaction.
///
/// `item_id` is a weak reference: the record outlives nothing and owns nothing.
/// Once stored it is never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub item_id: ItemId,
    #[serde(rename = "type")]
    pub kind: MovementType,
    pub quantity: Quantity,
    pub performed_by: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Signed effect of this transaction on the item's stock level.
    pub fn delta(&self) -> i64 {
        match self.kind {
            MovementType::In => self.quantity.get(),
            MovementType::Out => -self.quantity.get(),
        }
    }
}
