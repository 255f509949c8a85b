//! # Monthly Bonus Engine
//!
//! Awards customers a monthly credit computed from their closed orders.
//!
//! ## Backward Month Walk
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   run_for_customer(reference)                       │
//! │                                                                     │
//! │   ... | May [start, end) | June [start, end) | July ← reference     │
//! │                                        ▲                            │
//! │            walk ◄──────────────────────┘                            │
//! │                                                                     │
//! │   Per window, newest first:                                         │
//! │   1. bonus already posted in (start, end]?  → stop (caught up)      │
//! │   2. no ledger activity at or before end?   → stop (before history) │
//! │   3. balance at end below zero?             → stop (debtor guard)   │
//! │   4. total = Σ discounted invoices of orders closed in the window   │
//! │      with the policy's payment method; post Increase(total, bonus)  │
//! │      dated `end` when total > 0                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The posted bonus event doubles as the catch-up marker: re-running the
//! engine finds it in step 1 and stops, so the sweep is idempotent. A
//! window with activity but no qualifying orders posts nothing and the
//! walk continues past it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::DbResult;
use crate::repository::ledger::post_event;
use tally_core::{validation, Category, EventKind, LedgerEntry, LedgerEvent, Money};

// =============================================================================
// Policy
// =============================================================================

/// Parameters of a bonus run.
///
/// Passed explicitly per call; the engine keeps no configuration state,
/// so concurrent runs with different policies cannot observe each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BonusPolicy {
    /// Percent subtracted from each invoice before it counts toward the
    /// bonus (0..=100). A 5% discount credits 95 per 100 invoiced.
    pub discount_percent: i64,

    /// Payment method the bonus applies to. Only orders settled with this
    /// asset qualify, the debtor guard reads this asset's balance, and
    /// the bonus event is posted under it.
    pub balance_asset: i64,
}

impl BonusPolicy {
    /// Creates a new bonus policy.
    pub fn new(discount_percent: i64, balance_asset: i64) -> Self {
        BonusPolicy {
            discount_percent,
            balance_asset,
        }
    }
}

// =============================================================================
// Month Windows
// =============================================================================

/// First instant of `t`'s month, UTC midnight.
fn month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let date = t.date_naive();
    // Day 1 exists in every month; fall back to the input date only to
    // avoid a panic path.
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    DateTime::from_naive_utc_and_offset(first.and_time(NaiveTime::MIN), Utc)
}

/// First instant of the month before `t`'s month.
fn previous_month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    month_start(month_start(t) - Duration::days(1))
}

// =============================================================================
// Engine
// =============================================================================

/// Computes and posts monthly bonuses.
#[derive(Debug, Clone)]
pub struct BonusEngine {
    pool: SqlitePool,
}

impl BonusEngine {
    /// Creates a new BonusEngine.
    pub fn new(pool: SqlitePool) -> Self {
        BonusEngine { pool }
    }

    /// Catches a customer's bonuses up to the month before `reference`.
    ///
    /// Walks completed months backward from `reference` (defaults to now)
    /// and posts one Increase event tagged bonus per month with
    /// qualifying turnover. Already-awarded months stop the walk, so
    /// calling this after every close, on a schedule, or never until
    /// year-end all produce the same ledger.
    ///
    /// ## Returns
    /// The posted bonus events, newest month first. Empty when the
    /// customer is already caught up, has a negative balance, or had no
    /// qualifying turnover.
    ///
    /// ## Errors
    /// * `Validation` - discount percent outside 0..=100
    pub async fn run_for_customer(
        &self,
        account: i64,
        customer: i64,
        policy: &BonusPolicy,
        reference: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<LedgerEvent>> {
        validation::validate_discount_percent(policy.discount_percent)?;

        let reference = reference.unwrap_or_else(Utc::now);
        let mut end = month_start(reference);
        let mut posted = Vec::new();

        loop {
            let start = previous_month_start(end);

            // One transaction per window keeps the already-awarded check
            // and the post atomic against a concurrent run.
            let mut tx = self.pool.begin().await?;

            if has_bonus(&mut *tx, account, customer, start, end).await? {
                debug!(account, customer, window_end = %end, "Bonus already awarded, caught up");
                break;
            }

            if !has_activity(&mut *tx, account, customer, end).await? {
                debug!(account, customer, window_end = %end, "No activity before window, walk done");
                break;
            }

            let balance =
                asset_balance(&mut *tx, account, customer, policy.balance_asset, end).await?;
            if balance < 0 {
                info!(
                    account,
                    customer, balance, "Negative balance, bonus withheld"
                );
                break;
            }

            let total = qualifying_total(&mut *tx, account, customer, policy, start, end).await?;

            if total > 0 {
                let event = post_event(
                    &mut *tx,
                    EventKind::Increase,
                    LedgerEntry::new(account, customer, policy.balance_asset, total, Category::Bonus)
                        .at(end),
                )
                .await?;
                tx.commit().await?;

                info!(
                    account,
                    customer,
                    total,
                    window_start = %start,
                    window_end = %end,
                    "Monthly bonus awarded"
                );
                posted.push(event);
            }

            end = start;
        }

        Ok(posted)
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================

/// Whether a bonus event already exists in `(start, end]`.
///
/// The bonus for a window is dated at the window's closing instant, so
/// the half-open detection interval leans the other way than the order
/// window.
async fn has_bonus<'e, E>(
    executor: E,
    account: i64,
    customer: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DbResult<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let exists: i64 = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM ledger_events
            WHERE account = ?1 AND depot = ?2 AND category = ?3
              AND created_at > ?4 AND created_at <= ?5
        )
        "#,
    )
    .bind(account)
    .bind(customer)
    .bind(Category::Bonus.as_tag())
    .bind(start)
    .bind(end)
    .fetch_one(executor)
    .await?;

    Ok(exists != 0)
}

/// Whether the customer has any ledger activity at or before `end`.
async fn has_activity<'e, E>(
    executor: E,
    account: i64,
    customer: i64,
    end: DateTime<Utc>,
) -> DbResult<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let exists: i64 = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM ledger_events
            WHERE account = ?1 AND depot = ?2 AND created_at <= ?3
        )
        "#,
    )
    .bind(account)
    .bind(customer)
    .bind(end)
    .fetch_one(executor)
    .await?;

    Ok(exists != 0)
}

/// Customer's balance in one asset as of `at`.
async fn asset_balance<'e, E>(
    executor: E,
    account: i64,
    customer: i64,
    asset: i64,
    at: DateTime<Utc>,
) -> DbResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let balance: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE WHEN kind = 'increase' THEN value ELSE -value END), 0)
        FROM ledger_events
        WHERE account = ?1 AND depot = ?2 AND asset = ?3 AND created_at <= ?4
        "#,
    )
    .bind(account)
    .bind(customer)
    .bind(asset)
    .bind(at)
    .fetch_one(executor)
    .await?;

    Ok(balance)
}

/// Sum of per-order discounted invoices closed in `[start, end)` with the
/// policy's payment method.
///
/// The discount truncates per order, not on the monthly sum, so awarding
/// monthly matches awarding per order.
async fn qualifying_total<'e, E>(
    executor: E,
    account: i64,
    customer: i64,
    policy: &BonusPolicy,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DbResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let invoices: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT o.id, COALESCE(SUM(l.price * l.amount), 0) AS invoice
        FROM orders o
        JOIN order_lines l ON l.order_id = o.id
        WHERE o.account = ?1 AND o.customer = ?2 AND o.state = 'closed'
          AND o.payment_method = ?3
          AND o.closed_at >= ?4 AND o.closed_at < ?5
        GROUP BY o.id
        "#,
    )
    .bind(account)
    .bind(customer)
    .bind(policy.balance_asset)
    .bind(start)
    .bind(end)
    .fetch_all(executor)
    .await?;

    let total = invoices
        .iter()
        .map(|(_, invoice)| {
            Money::from_minor(*invoice)
                .apply_discount_percent(policy.discount_percent)
                .minor()
        })
        .sum();

    Ok(total)
}

// =============================================================================
// Unit Tests
// =============================================================================
