//! Inventory domain module.
//!
//! This crate contains the business rules for stock tracking, implemented purely as
//! deterministic domain logic (no IO, no storage, no clocks beyond values passed in).

pub mod alert;
pub mod item;
pub mod movement;
pub mod query;
pub mod transaction;

pub use alert::Alert;
pub use item::{Item, ItemPatch, NewItem, StockStatus};
pub use movement::{Movement, MovementType, Quantity};
pub use query::{ItemQuery, ItemSort, Page, SortDirection, SortField};
pub use transaction::{PendingTransaction, Transaction};
