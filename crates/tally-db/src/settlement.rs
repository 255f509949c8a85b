//! # Settlement Coordinator
//!
//! Orchestrates order close and reopen against the money ledger.
//!
//! ## Close / Reopen Settlement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Settlement (one transaction)                      │
//! │                                                                     │
//! │  close(order, method, amount_paid)                                  │
//! │    ├── invoice = SUM(price * amount) over the order's lines         │
//! │    ├── reject amount_paid < invoice (validation, before mutation)   │
//! │    ├── tip = amount_paid - invoice                                  │
//! │    ├── UPDATE orders ... WHERE state = 'open'   (check-and-flip)    │
//! │    ├── Decrease(invoice, category: invoice, order, method)          │
//! │    └── Decrease(tip,     category: tip)         only when tip > 0   │
//! │                                                                     │
//! │  reopen(order)                                                      │
//! │    ├── UPDATE orders ... WHERE state = 'closed'                     │
//! │    ├── Increase(invoice, category: undo-invoice)                    │
//! │    └── Increase(tip,     category: undo-tip)    only when tip > 0   │
//! │                                                                     │
//! │  Net ledger effect of close + reopen on an order is zero.           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state flip and the ledger posts commit together: a reader can
//! never observe a Closed order whose settlement events are missing, and
//! a losing concurrent close sees "not Open" with all of its posts rolled
//! back. Compensations on reopen are events, never deletions, so the
//! ledger stays auditable.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::ledger::{delete_event, fetch_event, post_event};
use crate::repository::order::{fetch_order, invoice_total, mark_closed, mark_open};
use tally_core::{validation, Category, EventKind, LedgerEntry, LedgerEvent, Order};

/// Outcome of a settlement or its reversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// The order after the state transition.
    pub order: Order,
    /// Invoice total the settlement was computed from.
    pub invoice: i64,
    /// Tip derived on close (amount paid minus invoice) or reversed on
    /// reopen.
    pub tip: i64,
    /// Ledger events posted by this settlement, in posting order.
    pub events: Vec<LedgerEvent>,
}

/// Coordinates order state transitions with their ledger effect.
#[derive(Debug, Clone)]
pub struct SettlementCoordinator {
    pool: SqlitePool,
}

impl SettlementCoordinator {
    /// Creates a new SettlementCoordinator.
    pub fn new(pool: SqlitePool) -> Self {
        SettlementCoordinator { pool }
    }

    /// Closes an Open order and posts its settlement.
    ///
    /// ## Arguments
    /// * `payment_method` - asset the settlement events are posted under
    /// * `amount_paid` - what the customer paid; the excess over the
    ///   invoice becomes the tip
    ///
    /// ## Errors
    /// * `NotFound` - unknown order
    /// * `Validation` - `amount_paid` below the invoice total
    /// * `StateConflict` - order not Open (e.g. a concurrent close won)
    pub async fn close(
        &self,
        order_id: i64,
        payment_method: i64,
        amount_paid: i64,
    ) -> DbResult<Settlement> {
        let mut tx = self.pool.begin().await?;

        let order = fetch_order(&mut *tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("order", order_id))?;

        // Consistent read: same transaction as the flip, so a line write
        // racing this close either lands before the invoice or is refused
        // by its own open-state check after the flip.
        let invoice = invoice_total(&mut *tx, order_id).await?;

        validation::validate_paid_covers_invoice(amount_paid, invoice)?;
        let tip = amount_paid - invoice;

        if mark_closed(&mut *tx, order_id, payment_method, tip).await? == 0 {
            return Err(DbError::conflict("order", order_id, "open"));
        }

        let mut events = Vec::with_capacity(2);
        events.push(
            post_event(
                &mut *tx,
                EventKind::Decrease,
                LedgerEntry::new(
                    order.account,
                    order.customer,
                    payment_method,
                    invoice,
                    Category::Invoice,
                )
                .for_order(order_id),
            )
            .await?,
        );

        if tip > 0 {
            events.push(
                post_event(
                    &mut *tx,
                    EventKind::Decrease,
                    LedgerEntry::new(
                        order.account,
                        order.customer,
                        payment_method,
                        tip,
                        Category::Tip,
                    )
                    .for_order(order_id),
                )
                .await?,
            );
        }

        let order = fetch_order(&mut *tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("order", order_id))?;

        tx.commit().await?;

        info!(order_id, invoice, tip, payment_method, "Order settled");

        Ok(Settlement {
            order,
            invoice,
            tip,
            events,
        })
    }

    /// Reopens a Closed order and reverses its settlement.
    ///
    /// Posts compensating Increase events mirroring the invoice and (when
    /// nonzero) tip amounts, tagged undo-invoice / undo-tip, in the same
    /// transaction as the Closed → Open flip.
    ///
    /// ## Errors
    /// * `NotFound` - unknown order
    /// * `StateConflict` - order not Closed
    pub async fn reopen(&self, order_id: i64) -> DbResult<Settlement> {
        let mut tx = self.pool.begin().await?;

        let order = fetch_order(&mut *tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("order", order_id))?;

        // Lines are frozen while Closed, so this reproduces the settled
        // invoice exactly.
        let invoice = invoice_total(&mut *tx, order_id).await?;
        let tip = order.tip;

        if mark_open(&mut *tx, order_id).await? == 0 {
            return Err(DbError::conflict("order", order_id, "closed"));
        }

        let mut events = Vec::with_capacity(2);
        events.push(
            post_event(
                &mut *tx,
                EventKind::Increase,
                LedgerEntry::new(
                    order.account,
                    order.customer,
                    order.payment_method,
                    invoice,
                    Category::UndoInvoice,
                )
                .for_order(order_id),
            )
            .await?,
        );

        if tip > 0 {
            events.push(
                post_event(
                    &mut *tx,
                    EventKind::Increase,
                    LedgerEntry::new(
                        order.account,
                        order.customer,
                        order.payment_method,
                        tip,
                        Category::UndoTip,
                    )
                    .for_order(order_id),
                )
                .await?,
            );
        }

        let order = fetch_order(&mut *tx, order_id)
            .await?
            .ok_or_else(|| DbError::not_found("order", order_id))?;

        tx.commit().await?;

        info!(order_id, invoice, tip, "Order settlement reversed");

        Ok(Settlement {
            order,
            invoice,
            tip,
            events,
        })
    }

    /// Physically removes a manual transfer event (undo transfer).
    ///
    /// Deposits, withdrawals and named transaction labels are manual human
    /// actions that must be correctable without leaving a wrong ledger
    /// event behind; everything system-derived stays and is reversed by
    /// compensating events only.
    ///
    /// ## Errors
    /// * `NotFound` - unknown event id
    /// * `StateConflict` - category not manually reversible
    pub async fn undo_transfer(&self, event_id: i64) -> DbResult<LedgerEvent> {
        let mut tx = self.pool.begin().await?;

        let event = fetch_event(&mut *tx, event_id)
            .await?
            .ok_or_else(|| DbError::not_found("ledger event", event_id))?;

        if !event.category.is_manually_reversible() {
            return Err(DbError::conflict(
                "ledger event",
                event_id,
                "a manually reversible category",
            ));
        }

        delete_event(&mut *tx, event_id).await?;

        tx.commit().await?;

        debug!(event_id, category = %event.category, "Transfer undone");

        Ok(event)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::ledger::{BalanceQuery, EventFilter};
    use tally_core::OrderState;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// Open order with lines summing to invoice 500.
    async fn order_with_invoice_500(db: &Database) -> i64 {
        let order = db.orders().create_order(1, 7, 0).await.unwrap().unwrap();
        db.orders().order_product(order.id, 1, 100, 3).await.unwrap();
        db.orders().order_product(order.id, 2, 200, 1).await.unwrap();
        order.id
    }

    #[tokio::test]
    async fn test_close_posts_invoice_and_tip() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        let settlement = db.settlement().close(order_id, 2, 550).await.unwrap();
        assert_eq!(settlement.invoice, 500);
        assert_eq!(settlement.tip, 50);
        assert_eq!(settlement.order.state, OrderState::Closed);
        assert_eq!(settlement.order.payment_method, 2);

        assert_eq!(settlement.events.len(), 2);
        assert_eq!(settlement.events[0].category, Category::Invoice);
        assert_eq!(settlement.events[0].value, 500);
        assert_eq!(settlement.events[1].category, Category::Tip);
        assert_eq!(settlement.events[1].value, 50);
        for event in &settlement.events {
            assert_eq!(event.kind, EventKind::Decrease);
            assert_eq!(event.order_id, order_id);
            assert_eq!(event.asset, 2);
            assert_eq!(event.depot, 7);
        }

        let balance = db
            .ledger()
            .balance(1, &BalanceQuery::default().depot(7))
            .await
            .unwrap();
        assert_eq!(balance, -550);
    }

    #[tokio::test]
    async fn test_close_without_tip_posts_single_event() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        let settlement = db.settlement().close(order_id, 2, 500).await.unwrap();
        assert_eq!(settlement.tip, 0);
        assert_eq!(settlement.events.len(), 1);
        assert_eq!(settlement.events[0].category, Category::Invoice);
    }

    #[tokio::test]
    async fn test_close_rejects_underpayment_without_mutation() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        let err = db.settlement().close(order_id, 2, 499).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));

        // Order untouched, nothing posted
        let order = db.orders().get_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Open);
        assert!(db
            .ledger()
            .events(1, &EventFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_second_close_conflicts_without_double_posting() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        db.settlement().close(order_id, 2, 500).await.unwrap();
        let err = db.settlement().close(order_id, 2, 500).await.unwrap_err();
        assert!(matches!(err, DbError::StateConflict { .. }));

        // Exactly one invoice event, no duplicates
        let invoices = db
            .ledger()
            .events(
                1,
                &EventFilter::default().categories(vec![Category::Invoice]),
            )
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_order_is_not_found() {
        let db = test_db().await;
        let err = db.settlement().close(9999, 2, 0).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_reopen_round_trip_nets_to_zero() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        // Close: Decrease(500, invoice) + Decrease(50, tip)
        db.settlement().close(order_id, 2, 550).await.unwrap();

        // Reopen: Increase(500, undo-invoice) + Increase(50, undo-tip)
        let reversal = db.settlement().reopen(order_id).await.unwrap();
        assert_eq!(reversal.invoice, 500);
        assert_eq!(reversal.tip, 50);
        assert_eq!(reversal.order.state, OrderState::Open);
        assert_eq!(reversal.events.len(), 2);
        assert_eq!(reversal.events[0].category, Category::UndoInvoice);
        assert_eq!(reversal.events[0].value, 500);
        assert_eq!(reversal.events[1].category, Category::UndoTip);
        assert_eq!(reversal.events[1].value, 50);
        for event in &reversal.events {
            assert_eq!(event.kind, EventKind::Increase);
            assert_eq!(event.order_id, order_id);
        }

        // Net ledger effect after close + reopen is zero
        let balance = db
            .ledger()
            .balance(1, &BalanceQuery::default().depot(7))
            .await
            .unwrap();
        assert_eq!(balance, 0);

        // All four events remain on the ledger: compensation, not deletion
        let events = db.ledger().events(1, &EventFilter::default()).await.unwrap();
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_reopen_open_order_conflicts() {
        let db = test_db().await;
        let order_id = order_with_invoice_500(&db).await;

        let err = db.settlement().reopen(order_id).await.unwrap_err();
        assert!(matches!(err, DbError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_undo_transfer_allows_manual_categories_only() {
        let db = test_db().await;
        let ledger = db.ledger();

        let deposit = ledger
            .increase(LedgerEntry::new(1, 7, 1, 500, Category::Deposit))
            .await
            .unwrap();
        let label = ledger
            .decrease(LedgerEntry::new(
                1,
                7,
                1,
                120,
                Category::Label("club-fee".to_string()),
            ))
            .await
            .unwrap();

        let order_id = order_with_invoice_500(&db).await;
        let settlement = db.settlement().close(order_id, 1, 500).await.unwrap();
        let invoice_event = settlement.events[0].clone();

        // Manual categories can be undone
        let undone = db.settlement().undo_transfer(deposit.id).await.unwrap();
        assert_eq!(undone.id, deposit.id);
        assert!(ledger.event_by_id(deposit.id).await.unwrap().is_none());
        db.settlement().undo_transfer(label.id).await.unwrap();

        // System-derived settlement events cannot
        let err = db
            .settlement()
            .undo_transfer(invoice_event.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::StateConflict { .. }));
        assert!(ledger
            .event_by_id(invoice_event.id)
            .await
            .unwrap()
            .is_some());

        // Unknown event is a distinct not-found
        let err = db.settlement().undo_transfer(9999).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
