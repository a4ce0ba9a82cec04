//! Postgres-backed item store and transaction log.
//!
//! One [`PostgresInventoryStore`] implements both [`ItemStore`] and
//! [`TransactionLog`] over a shared pool. Compare-and-set is a single conditional
//! `UPDATE`, so no row lock is held between the engine's read and its write.
//! [`InventoryStore::commit_movement`] runs that `UPDATE` and the transaction
//! `INSERT` inside one database transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Referenced` |
//! | Database (check constraint violation) | `23514` | `Invalid` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / Io / PoolTimedOut | N/A | `Unavailable` |
//! | Other | N/A | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::instrument;
use uuid::Uuid;

use stockwatch_core::{ExpectedVersion, ItemId, TransactionId, UserId};
use stockwatch_inventory::{
    Item, ItemQuery, MovementType, Page, PendingTransaction, Quantity, StockStatus, Transaction,
};

use super::r#trait::{InventoryStore, ItemStore, StoreError, TransactionLog};

const MIGRATION: &str = include_str!("../../migrations/0001_create_inventory.sql");

const ITEM_COLUMNS: &str =
    "id, name, category, stock_level, reorder_point, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, item_id, type, quantity, performed_by, occurred_at";

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO stock_transactions (id, item_id, type, quantity, performed_by, occurred_at)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

/// Postgres-backed item store + transaction log.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn current_stock(&self, id: ItemId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT stock_level FROM items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_stock", e))?;

        row.map(|r| r.try_get::<i64, _>("stock_level"))
            .transpose()
            .map_err(|e| StoreError::Invalid(format!("failed to read stock_level: {e}")))
    }

    async fn current_version(&self, id: ItemId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT version FROM items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_version", e))?;

        row.map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| StoreError::Invalid(format!("failed to read version: {e}")))
    }

    /// Explain why a conditional stock write matched no row.
    async fn stock_miss(&self, id: ItemId, expected_stock: i64) -> StoreError {
        match self.current_stock(id).await {
            Ok(None) => StoreError::NotFound,
            Ok(Some(actual)) => StoreError::Conflict(format!(
                "stock level changed (expected {expected_stock}, found {actual})"
            )),
            Err(e) => e,
        }
    }

    /// Explain why a conditional write matched no row.
    async fn version_miss(&self, id: ItemId, expected: ExpectedVersion) -> StoreError {
        match self.current_version(id).await {
            Ok(None) => StoreError::NotFound,
            Ok(Some(actual)) => {
                StoreError::Conflict(format!("expected {expected:?}, found version {actual}"))
            }
            Err(e) => e,
        }
    }
}

fn expected_version_param(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

fn push_item_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ItemQuery) {
    qb.push(" WHERE TRUE");
    if let Some(term) = &query.search {
        qb.push(" AND name ILIKE ")
            .push_bind(format!("%{}%", escape_like(term)));
    }
    if let Some(category) = &query.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(status) = query.stock_status {
        qb.push(match status {
            StockStatus::Low => " AND stock_level <= reorder_point",
            StockStatus::Out => " AND stock_level <= 0",
            StockStatus::Ok => " AND stock_level > reorder_point",
        });
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl ItemStore for PostgresInventoryStore {
    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn insert(&self, item: Item) -> Result<Item, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO items (id, name, category, stock_level, reorder_point, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(&item.category)
        .bind(item.stock_level)
        .bind(item.reorder_point)
        .bind(item.version as i64)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;

        item_from_row(&row)
    }

    async fn get(&self, id: ItemId) -> Result<Item, StoreError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?
            .ok_or(StoreError::NotFound)?;

        item_from_row(&row)
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn compare_and_set(
        &self,
        id: ItemId,
        expected_stock: i64,
        new_stock: i64,
    ) -> Result<Item, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE items
            SET stock_level = $3, version = version + 1, updated_at = now()
            WHERE id = $1 AND stock_level = $2
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expected_stock)
        .bind(new_stock)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("compare_and_set", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(self.stock_miss(id, expected_stock).await),
        }
    }

    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn replace(&self, item: Item, expected: ExpectedVersion) -> Result<Item, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE items
            SET name = $2, category = $3, stock_level = $4, reorder_point = $5,
                version = version + 1, updated_at = $6
            WHERE id = $1 AND ($7::BIGINT IS NULL OR version = $7)
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(&item.category)
        .bind(item.stock_level)
        .bind(item.reorder_point)
        .bind(item.updated_at)
        .bind(expected_version_param(expected))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replace_item", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(self.version_miss(item.id, expected).await),
        }
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn delete(&self, id: ItemId, expected: ExpectedVersion) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM items WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)")
                .bind(id.as_uuid())
                .bind(expected_version_param(expected))
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_item", e))?;

        if result.rows_affected() == 0 {
            return Err(self.version_miss(id, expected).await);
        }
        Ok(())
    }

    async fn list(&self, query: &ItemQuery) -> Result<Page<Item>, StoreError> {
        query
            .validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM items");
        push_item_filters(&mut count, query);
        let total: i64 = count
            .build()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_items", e))?
            .try_get("total")
            .map_err(|e| StoreError::Invalid(format!("failed to read total: {e}")))?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {ITEM_COLUMNS} FROM items"));
        push_item_filters(&mut select, query);
        let direction = match query.sort.direction {
            stockwatch_inventory::SortDirection::Asc => "ASC",
            stockwatch_inventory::SortDirection::Desc => "DESC",
        };
        select
            .push(format!(
                " ORDER BY {} {direction}, id {direction}",
                query.sort.field.column()
            ))
            .push(" LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_items", e))?;

        let items = rows
            .iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            total: total as u64,
            page: query.page,
            limit: query.limit,
            items,
        })
    }

    fn list_at_or_below_threshold(&self) -> BoxStream<'_, Result<Item, StoreError>> {
        sqlx::query(
            r#"
            SELECT id, name, category, stock_level, reorder_point, version, created_at, updated_at
            FROM items
            WHERE stock_level <= reorder_point
            ORDER BY name ASC, id ASC
            "#,
        )
        .fetch(&*self.pool)
        .map(|row| {
            let row = row.map_err(|e| map_sqlx_error("list_at_or_below_threshold", e))?;
            item_from_row(&row)
        })
        .boxed()
    }
}

#[async_trait]
impl TransactionLog for PostgresInventoryStore {
    #[instrument(skip(self, pending), fields(item_id = %pending.item_id, kind = %pending.kind), err)]
    async fn append(&self, pending: PendingTransaction) -> Result<Transaction, StoreError> {
        let tx = pending.assign(TransactionId::new());

        bind_transaction(sqlx::query(INSERT_TRANSACTION), &tx)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("append_transaction", e))?;

        Ok(tx)
    }

    async fn history(&self, item_id: ItemId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM stock_transactions WHERE item_id = $1 ORDER BY occurred_at ASC, id ASC"
        ))
        .bind(item_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list(&self) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM stock_transactions ORDER BY occurred_at ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn has_transactions(&self, item_id: ItemId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM stock_transactions WHERE item_id = $1) AS referenced",
        )
        .bind(item_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_transactions", e))?;

        row.try_get("referenced")
            .map_err(|e| StoreError::Invalid(format!("failed to read referenced: {e}")))
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self, pending), fields(item_id = %pending.item_id, kind = %pending.kind), err)]
    async fn commit_movement(
        &self,
        expected_stock: i64,
        new_stock: i64,
        pending: PendingTransaction,
    ) -> Result<(Item, Transaction), StoreError> {
        let record = pending.assign(TransactionId::new());

        // Use a transaction for atomicity
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE items
            SET stock_level = $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND stock_level = $2
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(record.item_id.as_uuid())
        .bind(expected_stock)
        .bind(new_stock)
        .bind(record.timestamp)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("commit_movement_update", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(self.stock_miss(record.item_id, expected_stock).await);
        };
        let item = item_from_row(&row)?;

        bind_transaction(sqlx::query(INSERT_TRANSACTION), &record)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit_movement_insert", e))?;

        // Dropping `tx` on any error above rolls both writes back.
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok((item, record))
    }
}

fn bind_transaction<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    tx: &Transaction,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(*tx.id.as_uuid())
        .bind(*tx.item_id.as_uuid())
        .bind(tx.kind.as_str())
        .bind(tx.quantity.get())
        .bind(tx.performed_by.map(Uuid::from))
        .bind(tx.timestamp)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::Referenced(msg),
                Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct ItemRow {
    id: Uuid,
    name: String,
    category: String,
    stock_level: i64,
    reorder_point: i64,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            stock_level: row.try_get("stock_level")?,
            reorder_point: row.try_get("reorder_point")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId::from_uuid(row.id),
            name: row.name,
            category: row.category,
            stock_level: row.stock_level,
            reorder_point: row.reorder_point,
            version: row.version as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn item_from_row(row: &PgRow) -> Result<Item, StoreError> {
    ItemRow::from_row(row)
        .map(Item::from)
        .map_err(|e| StoreError::Invalid(format!("failed to deserialize item row: {e}")))
}

#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    item_id: Uuid,
    kind: String,
    quantity: i64,
    performed_by: Option<Uuid>,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            kind: row.try_get("type")?,
            quantity: row.try_get("quantity")?,
            performed_by: row.try_get("performed_by")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind: MovementType = row
            .kind
            .parse()
            .map_err(|e| StoreError::Invalid(format!("bad transaction type: {e}")))?;
        let quantity = Quantity::new(row.quantity)
            .map_err(|e| StoreError::Invalid(format!("bad transaction quantity: {e}")))?;

        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            item_id: ItemId::from_uuid(row.item_id),
            kind,
            quantity,
            performed_by: row.performed_by.map(UserId::from_uuid),
            timestamp: row.occurred_at,
        })
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    TransactionRow::from_row(row)
        .map_err(|e| StoreError::Invalid(format!("failed to deserialize transaction row: {e}")))?
        .try_into()
}
