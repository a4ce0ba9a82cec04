//! Item store and transaction log boundaries.
//!
//! The engine, catalog and sweeper only see the traits in [`r#trait`]. Both
//! implementations keep items and transaction records behind one commit boundary
//! ([`InventoryStore`]): in-memory for tests/dev, Postgres for production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{InventoryStore, ItemStore, StoreError, TransactionLog};
