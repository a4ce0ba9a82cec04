use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockwatch_core::{DomainError, DomainResult, ItemId};

/// A tracked inventory item: identity, current stock and reorder threshold.
///
/// `stock_level` only changes through a stock movement or an administrative edit;
/// `version` is bumped by every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub category: String,
    pub stock_level: i64,
    pub reorder_point: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// True when the item is at or below its reorder point.
    pub fn is_low_stock(&self) -> bool {
        self.stock_level <= self.reorder_point
    }

    pub fn stock_status(&self) -> StockStatus {
        if self.stock_level <= 0 {
            StockStatus::Out
        } else if self.is_low_stock() {
            StockStatus::Low
        } else {
            StockStatus::Ok
        }
    }

    /// Copy of this item with a new stock level and the next revision.
    pub fn with_stock(&self, stock_level: i64, now: DateTime<Utc>) -> Item {
        Item {
            stock_level,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Stock status buckets used by item listings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    /// At or below the reorder point (includes out of stock).
    Low,
    /// Nothing on hand.
    Out,
    /// Above the reorder point.
    Ok,
}

impl StockStatus {
    pub fn matches(self, item: &Item) -> bool {
        match self {
            StockStatus::Low => item.is_low_stock(),
            StockStatus::Out => item.stock_level <= 0,
            StockStatus::Ok => !item.is_low_stock(),
        }
    }
}

impl FromStr for StockStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(StockStatus::Low),
            "out" => Ok(StockStatus::Out),
            "ok" => Ok(StockStatus::Ok),
            other => Err(DomainError::validation(format!(
                "stock status must be one of: low, out, ok (got '{other}')"
            ))),
        }
    }
}

/// Input for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub stock_level: i64,
    #[serde(default)]
    pub reorder_point: i64,
}

impl NewItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            stock_level: 0,
            reorder_point: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_stock_level(mut self, stock_level: i64) -> Self {
        self.stock_level = stock_level;
        self
    }

    pub fn with_reorder_point(mut self, reorder_point: i64) -> Self {
        self.reorder_point = reorder_point;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_name(&self.name)?;
        validate_stock_level(self.stock_level)?;
        validate_reorder_point(self.reorder_point)
    }

    /// Validate and materialize the item at revision 1.
    pub fn into_item(self, id: ItemId, now: DateTime<Utc>) -> DomainResult<Item> {
        self.validate()?;
        Ok(Item {
            id,
            name: self.name.trim().to_string(),
            category: self.category,
            stock_level: self.stock_level,
            reorder_point: self.reorder_point,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Administrative edit of an item. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub stock_level: Option<i64>,
    pub reorder_point: Option<i64>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.stock_level.is_none()
            && self.reorder_point.is_none()
    }

    /// Produce the edited item at the next revision.
    pub fn apply(&self, item: &Item, now: DateTime<Utc>) -> DomainResult<Item> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(stock_level) = self.stock_level {
            validate_stock_level(stock_level)?;
        }
        if let Some(reorder_point) = self.reorder_point {
            validate_reorder_point(reorder_point)?;
        }

        Ok(Item {
            id: item.id,
            name: self
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| item.name.clone()),
            category: self.category.clone().unwrap_or_else(|| item.category.clone()),
            stock_level: self.stock_level.unwrap_or(item.stock_level),
            reorder_point: self.reorder_point.unwrap_or(item.reorder_point),
            version: item.version + 1,
            created_at: item.created_at,
            updated_at: now,
        })
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Ok(())
}

fn validate_stock_level(stock_level: i64) -> DomainResult<()> {
    if stock_level < 0 {
        return Err(DomainError::validation("stock level cannot be negative"));
    }
    Ok(())
}

fn validate_reorder_point(reorder_point: i64) -> DomainResult<()> {
    if reorder_point < 0 {
        return Err(DomainError::validation("reorder point cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stock_level: i64, reorder_point: i64) -> Item {
        NewItem::new("SFP module")
            .with_stock_level(stock_level)
            .with_reorder_point(reorder_point)
            .into_item(ItemId::new(), Utc::now())
            .unwrap()
    }

    #[test]
    fn low_stock_is_inclusive_of_reorder_point() {
        assert!(item(5, 5).is_low_stock());
        assert!(item(4, 5).is_low_stock());
        assert!(!item(6, 5).is_low_stock());
    }

    #[test]
    fn stock_status_buckets() {
        assert_eq!(item(0, 5).stock_status(), StockStatus::Out);
        assert_eq!(item(3, 5).stock_status(), StockStatus::Low);
        assert_eq!(item(30, 5).stock_status(), StockStatus::Ok);

        assert!(StockStatus::Low.matches(&item(0, 5)));
        assert!(StockStatus::Out.matches(&item(0, 5)));
        assert!(!StockStatus::Ok.matches(&item(5, 5)));
    }

    #[test]
    fn new_item_rejects_blank_name_and_negative_values() {
        assert!(matches!(
            NewItem::new("   ").validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(NewItem::new("x").with_stock_level(-1).validate().is_err());
        assert!(NewItem::new("x").with_reorder_point(-1).validate().is_err());
    }

    #[test]
    fn new_item_starts_at_version_one() {
        let it = item(10, 2);
        assert_eq!(it.version, 1);
        assert_eq!(it.created_at, it.updated_at);
    }

    #[test]
    fn with_stock_bumps_version() {
        let it = item(10, 2);
        let next = it.with_stock(7, Utc::now());
        assert_eq!(next.stock_level, 7);
        assert_eq!(next.version, 2);
        assert_eq!(next.name, it.name);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let it = item(10, 2).clone();
        let patch = ItemPatch {
            reorder_point: Some(8),
            ..Default::default()
        };
        let edited = patch.apply(&it, Utc::now()).unwrap();
        assert_eq!(edited.reorder_point, 8);
        assert_eq!(edited.stock_level, 10);
        assert_eq!(edited.name, "SFP module");
        assert_eq!(edited.version, it.version + 1);
    }

    #[test]
    fn patch_validates_like_creation() {
        let it = item(10, 2);
        let patch = ItemPatch {
            stock_level: Some(-3),
            ..Default::default()
        };
        assert!(patch.apply(&it, Utc::now()).is_err());
        assert!(ItemPatch::default().is_empty());
    }

    #[test]
    fn stock_status_parses_case_insensitively() {
        assert_eq!("LOW".parse::<StockStatus>().unwrap(), StockStatus::Low);
        assert!("empty".parse::<StockStatus>().is_err());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(item(1, 2)).unwrap();
        assert_eq!(json["stockLevel"], 1);
        assert_eq!(json["reorderPoint"], 2);
    }
}
