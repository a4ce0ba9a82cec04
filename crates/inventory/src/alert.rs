//! Human-readable low-stock alert messages.

use serde::{Deserialize, Serialize};

use crate::item::Item;

pub const REORDER_SUBJECT: &str = "Stock Reorder Alert";
pub const LOW_STOCK_SUBJECT: &str = "Low Stock Alert";

/// A message destined for an operator channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

impl Alert {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Alert raised right after a movement leaves `item` at or below its reorder point.
    pub fn reorder(item: &Item) -> Self {
        Self::new(
            REORDER_SUBJECT,
            format!(
                "Stock alert: {} now at {} (reorder point {})",
                item.name, item.stock_level, item.reorder_point
            ),
        )
    }

    /// One consolidated alert for a sweep; `None` when nothing is low.
    pub fn low_stock_summary(items: &[Item]) -> Option<Self> {
        if items.is_empty() {
            return None;
        }

        let lines: Vec<String> = items
            .iter()
            .map(|i| {
                format!(
                    "{} (stock: {}, reorderPoint: {})",
                    i.name, i.stock_level, i.reorder_point
                )
            })
            .collect();

        Some(Self::new(
            LOW_STOCK_SUBJECT,
            format!("LOW STOCK ALERT:\n{}", lines.join("\n")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use stockwatch_core::ItemId;

    use super::*;
    use crate::item::NewItem;

    fn item(name: &str, stock: i64, reorder: i64) -> Item {
        NewItem::new(name)
            .with_stock_level(stock)
            .with_reorder_point(reorder)
            .into_item(ItemId::new(), Utc::now())
            .unwrap()
    }

    #[test]
    fn reorder_alert_names_item_stock_and_threshold() {
        let alert = Alert::reorder(&item("Patch cable", 4, 5));
        assert_eq!(alert.subject, REORDER_SUBJECT);
        assert_eq!(alert.body, "Stock alert: Patch cable now at 4 (reorder point 5)");
    }

    #[test]
    fn summary_has_one_line_per_item() {
        let alert =
            Alert::low_stock_summary(&[item("A", 2, 5), item("B", 0, 1)]).unwrap();
        assert_eq!(alert.subject, LOW_STOCK_SUBJECT);
        assert_eq!(
            alert.body,
            "LOW STOCK ALERT:\nA (stock: 2, reorderPoint: 5)\nB (stock: 0, reorderPoint: 1)"
        );
    }

    #[test]
    fn empty_summary_is_none() {
        assert!(Alert::low_stock_summary(&[]).is_none());
    }
}
