//! # Order Repository
//!
//! Database operations for orders and their product lines.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                               │
//! │                                                                     │
//! │  1. CREATE                                                          │
//! │     └── create_order() → Order { state: Open }                      │
//! │         (None when the customer already has an Open order)          │
//! │                                                                     │
//! │  2. LINE ITEMS (Open only)                                          │
//! │     └── order_product()  → upsert, amount accumulates               │
//! │     └── update_product() → partial amount/price update              │
//! │     └── cancel_product() → idempotent removal                       │
//! │                                                                     │
//! │  3. CLOSE / REOPEN                                                  │
//! │     └── close_order()  → Open → Closed (conditional update)         │
//! │     └── reopen_order() → Closed → Open (settlement is reversed      │
//! │         by the coordinator, not here)                               │
//! │                                                                     │
//! │  4. DELETE (Open only)                                              │
//! │     └── delete_order() → removes order + lines; an order with       │
//! │         committed financial history is never deleted                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state check is embedded in the mutating statement itself
//! (`WHERE state = 'open'` / a correlated EXISTS), never a separate read,
//! so concurrent close/delete and line writes linearize inside SQLite.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{validation, LineUpdate, Order, OrderLine};

// =============================================================================
// Shared Statements (also used inside the settlement transaction)
// =============================================================================

/// Fetches an order through the given executor.
pub(crate) async fn fetch_order<'e, E>(executor: E, id: i64) -> DbResult<Option<Order>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let order: Option<Order> = sqlx::query_as(
        "SELECT id, account, customer, state, payment_method, tip, \
                created_at, updated_at, closed_at \
         FROM orders WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(order)
}

/// Invoice total `SUM(price * amount)` through the given executor.
///
/// A single statement, so the read is consistent against concurrent line
/// writes; the settlement path additionally runs it inside the close
/// transaction.
pub(crate) async fn invoice_total<'e, E>(executor: E, order_id: i64) -> DbResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(price * amount), 0) FROM order_lines WHERE order_id = ?1",
    )
    .bind(order_id)
    .fetch_one(executor)
    .await?;

    Ok(total)
}

/// Conditional Open → Closed flip. Returns rows affected (0 = not Open).
pub(crate) async fn mark_closed<'e, E>(
    executor: E,
    order_id: i64,
    payment_method: i64,
    tip: i64,
) -> DbResult<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE orders SET
            state = 'closed',
            payment_method = ?2,
            tip = ?3,
            closed_at = ?4,
            updated_at = ?4
        WHERE id = ?1 AND state = 'open'
        "#,
    )
    .bind(order_id)
    .bind(payment_method)
    .bind(tip)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Conditional Closed → Open flip, clearing the settlement fields.
/// Returns rows affected (0 = not Closed).
pub(crate) async fn mark_open<'e, E>(executor: E, order_id: i64) -> DbResult<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE orders SET
            state = 'open',
            tip = 0,
            closed_at = NULL,
            updated_at = ?2
        WHERE id = ?1 AND state = 'closed'
        "#,
    )
    .bind(order_id)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by id.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Order>> {
        fetch_order(&self.pool, id).await
    }

    /// Gets the customer's Open order, if any.
    pub async fn open_for_customer(&self, customer: i64) -> DbResult<Option<Order>> {
        let order: Option<Order> = sqlx::query_as(
            "SELECT id, account, customer, state, payment_method, tip, \
                    created_at, updated_at, closed_at \
             FROM orders WHERE customer = ?1 AND state = 'open'",
        )
        .bind(customer)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// Creates a new Open order for a customer.
    ///
    /// ## Returns
    /// `None` when the customer already has an Open order. The check and
    /// the insert are one atomic step: the partial unique index on
    /// `orders(customer) WHERE state = 'open'` resolves concurrent
    /// creations inside the storage engine, so exactly one caller wins.
    pub async fn create_order(
        &self,
        account: i64,
        customer: i64,
        payment_method: i64,
    ) -> DbResult<Option<Order>> {
        validation::validate_id("customer", customer)?;

        let now = Utc::now();

        debug!(account, customer, "Creating order");

        let result = sqlx::query(
            r#"
            INSERT INTO orders (account, customer, state, payment_method, tip, created_at, updated_at, closed_at)
            VALUES (?1, ?2, 'open', ?3, 0, ?4, ?4, NULL)
            "#,
        )
        .bind(account)
        .bind(customer)
        .bind(payment_method)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::from);

        let result = match result {
            Ok(result) => result,
            Err(err) if err.is_unique_violation() => {
                debug!(customer, "Customer already has an open order");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let id = result.last_insert_rowid();

        fetch_order(&self.pool, id).await
    }

    /// Orders a product onto an Open order (upsert).
    ///
    /// ## Snapshot Pattern
    /// `price` is the discounted unit price computed upstream (product
    /// price and discount percentage; 0 means full price). It is stored
    /// once and never recomputed server-side: repeat calls for the same
    /// product only accumulate `amount`.
    pub async fn order_product(
        &self,
        order_id: i64,
        product: i64,
        price: i64,
        amount: i64,
    ) -> DbResult<OrderLine> {
        validation::validate_id("order", order_id)?;
        validation::validate_price(price)?;
        validation::validate_amount(amount)?;

        let mut tx = self.pool.begin().await?;

        // The open-state check lives in the statement; a concurrent close
        // makes this affect zero rows instead of writing into a settled
        // order. The WHERE clause is also required by SQLite's upsert
        // grammar for INSERT ... SELECT.
        let result = sqlx::query(
            r#"
            INSERT INTO order_lines (order_id, product, price, amount)
            SELECT ?1, ?2, ?3, ?4
            WHERE EXISTS (SELECT 1 FROM orders WHERE id = ?1 AND state = 'open')
            ON CONFLICT (order_id, product) DO UPDATE SET amount = amount + excluded.amount
            "#,
        )
        .bind(order_id)
        .bind(product)
        .bind(price)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return match fetch_order(&mut *tx, order_id).await? {
                None => Err(DbError::not_found("order", order_id)),
                Some(_) => Err(DbError::conflict("order", order_id, "open")),
            };
        }

        sqlx::query("UPDATE orders SET updated_at = ?2 WHERE id = ?1")
            .bind(order_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let line: OrderLine = sqlx::query_as(
            "SELECT order_id, product, price, amount \
             FROM order_lines WHERE order_id = ?1 AND product = ?2",
        )
        .bind(order_id)
        .bind(product)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(order_id, product, price = line.price, amount = line.amount, "Product ordered");

        Ok(line)
    }

    /// Partially updates a line's amount and/or price.
    ///
    /// ## Returns
    /// Rows affected. Zero when no field was supplied, the line does not
    /// exist, or the order is not Open - all expected no-ops, not errors.
    /// Updating only `amount` never alters the snapshotted price.
    pub async fn update_product(
        &self,
        order_id: i64,
        product: i64,
        changes: LineUpdate,
    ) -> DbResult<u64> {
        if changes.is_empty() {
            return Ok(0);
        }
        if let Some(amount) = changes.amount {
            validation::validate_amount(amount)?;
        }
        if let Some(price) = changes.price {
            validation::validate_price(price)?;
        }

        let mut tx = self.pool.begin().await?;

        let mut qb: sqlx::QueryBuilder<Sqlite> = sqlx::QueryBuilder::new("UPDATE order_lines SET ");
        let mut fields = qb.separated(", ");
        if let Some(amount) = changes.amount {
            fields.push("amount = ").push_bind_unseparated(amount);
        }
        if let Some(price) = changes.price {
            fields.push("price = ").push_bind_unseparated(price);
        }
        qb.push(" WHERE order_id = ")
            .push_bind(order_id)
            .push(" AND product = ")
            .push_bind(product)
            .push(" AND EXISTS (SELECT 1 FROM orders WHERE id = ")
            .push_bind(order_id)
            .push(" AND state = 'open')");

        let affected = qb.build().execute(&mut *tx).await?.rows_affected();

        if affected > 0 {
            sqlx::query("UPDATE orders SET updated_at = ?2 WHERE id = ?1")
                .bind(order_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(order_id, product, affected, "Product updated");

        Ok(affected)
    }

    /// Removes a line from an Open order.
    ///
    /// Idempotent: removing twice reports `false` the second time, not an
    /// error. Deleting the last line signals the caller to delete the
    /// order; the repository does not do that on its own.
    pub async fn cancel_product(&self, order_id: i64, product: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM order_lines
            WHERE order_id = ?1 AND product = ?2
              AND EXISTS (SELECT 1 FROM orders WHERE id = ?1 AND state = 'open')
            "#,
        )
        .bind(order_id)
        .bind(product)
        .execute(&self.pool)
        .await?;

        let removed = result.rows_affected() > 0;
        debug!(order_id, product, removed, "Product cancelled");

        Ok(removed)
    }

    /// Closes an Open order, recording payment method and tip.
    ///
    /// ## Returns
    /// `None` if the order was not Open. The check-and-flip is a single
    /// conditional UPDATE whose affected-row count communicates success;
    /// a second concurrent close observes "not Open" and cannot settle
    /// twice. Ledger posting is the settlement coordinator's job.
    pub async fn close_order(
        &self,
        order_id: i64,
        payment_method: i64,
        tip: i64,
    ) -> DbResult<Option<Order>> {
        validation::validate_event_value(tip)?;

        if mark_closed(&self.pool, order_id, payment_method, tip).await? == 0 {
            return Ok(None);
        }

        debug!(order_id, payment_method, tip, "Order closed");

        fetch_order(&self.pool, order_id).await
    }

    /// Reopens a Closed order, clearing the settlement fields.
    ///
    /// ## Returns
    /// `None` if the order was not Closed. The compensating ledger events
    /// are the settlement coordinator's job; prefer
    /// `SettlementCoordinator::reopen` which does both in one transaction.
    pub async fn reopen_order(&self, order_id: i64) -> DbResult<Option<Order>> {
        if mark_open(&self.pool, order_id).await? == 0 {
            return Ok(None);
        }

        debug!(order_id, "Order reopened");

        fetch_order(&self.pool, order_id).await
    }

    /// Deletes an Open order and its lines atomically.
    ///
    /// ## Returns
    /// `false` if the order was not Open: an order with committed
    /// financial history must never be deleted.
    pub async fn delete_order(&self, order_id: i64) -> DbResult<bool> {
        // Lines go with the order via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM orders WHERE id = ?1 AND state = 'open'")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        debug!(order_id, deleted, "Order deleted");

        Ok(deleted)
    }

    /// Computes the order's invoice: `SUM(price * amount)` over its lines.
    ///
    /// Computed on demand, never persisted. Unknown orders are reported
    /// as not-found rather than an empty zero invoice.
    pub async fn invoice(&self, order_id: i64) -> DbResult<i64> {
        if fetch_order(&self.pool, order_id).await?.is_none() {
            return Err(DbError::not_found("order", order_id));
        }

        invoice_total(&self.pool, order_id).await
    }

    /// Gets all lines of an order.
    pub async fn lines(&self, order_id: i64) -> DbResult<Vec<OrderLine>> {
        let lines: Vec<OrderLine> = sqlx::query_as(
            "SELECT order_id, product, price, amount \
             FROM order_lines WHERE order_id = ?1 ORDER BY product",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
