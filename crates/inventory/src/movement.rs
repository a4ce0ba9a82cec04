//! Stock movements: the only way stock changes outside administrative edits.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockwatch_core::{DomainError, DomainResult, ItemId, UserId};

/// Direction of a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
        }
    }

    /// Stock level after applying `quantity` in this direction.
    ///
    /// OUT never drives stock below zero; IN has no upper bound beyond `i64`.
    pub fn apply_to(self, stock_level: i64, quantity: Quantity) -> DomainResult<i64> {
        match self {
            MovementType::In => stock_level
                .checked_add(quantity.get())
                .ok_or_else(|| DomainError::validation("stock level overflow")),
            MovementType::Out => {
                let next = stock_level - quantity.get();
                if next < 0 {
                    Err(DomainError::insufficient_stock(stock_level, quantity.get()))
                } else {
                    Ok(next)
                }
            }
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            other => Err(DomainError::validation(format!(
                "transaction type must be IN or OUT (got '{other}')"
            ))),
        }
    }
}

/// A strictly positive movement quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be > 0 (got {value})"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

/// A requested stock change against one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub item_id: ItemId,
    #[serde(rename = "type")]
    pub kind: MovementType,
    pub quantity: Quantity,
    pub performed_by: Option<UserId>,
}

impl Movement {
    pub fn new(item_id: ItemId, kind: MovementType, quantity: Quantity) -> Self {
        Self {
            item_id,
            kind,
            quantity,
            performed_by: None,
        }
    }

    pub fn stock_in(item_id: ItemId, quantity: Quantity) -> Self {
        Self::new(item_id, MovementType::In, quantity)
    }

    pub fn stock_out(item_id: ItemId, quantity: Quantity) -> Self {
        Self::new(item_id, MovementType::Out, quantity)
    }

    pub fn performed_by(mut self, user: UserId) -> Self {
        self.performed_by = Some(user);
        self
    }
}
