//! # Domain Types
//!
//! Core domain types of the accounting core.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                │
//! │                                                                     │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │   LedgerEvent   │   │      Order      │   │    OrderLine    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  id (sequence)  │   │  id (sequence)  │   │  order_id (FK)  │   │
//! │  │  kind           │   │  customer       │   │  product        │   │
//! │  │  value          │   │  state          │   │  price snapshot │   │
//! │  │  category       │   │  tip            │   │  amount         │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘   │
//! │                                                                     │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │    Category     │   │    EventKind    │   │   OrderState    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  Deposit, ...   │   │  Increase       │   │  Open           │   │
//! │  │  Label(name)    │   │  Decrease       │   │  Closed         │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All identifiers (account, depot/customer, product, asset) are caller
//! supplied small integers; event and order ids are storage sequences.
//! All monetary fields are i64 minor currency units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// =============================================================================
// Category
// =============================================================================

/// Semantic category tag of a ledger event.
///
/// ## Why An Enum?
/// The category doubles as the key for reversal and bonus-detection logic.
/// A closed enumeration (plus an explicit named-label variant) means a typo
/// cannot silently break "has this month already been paid?" checks the way
/// a bare string could.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// Manual cash-in booked by a human.
    Deposit,
    /// Manual cash-out booked by a human.
    Withdraw,
    /// Settlement of an order's invoice total.
    Invoice,
    /// Settlement of the tip paid on top of an invoice.
    Tip,
    /// Monthly loyalty rebate posted by the bonus engine.
    Bonus,
    /// Compensation for an invoice settlement after reopen.
    UndoInvoice,
    /// Compensation for a tip settlement after reopen.
    UndoTip,
    /// Caller-defined transaction label, referenced by name.
    Label(String),
}

impl Category {
    /// Returns the storage tag for this category.
    pub fn as_tag(&self) -> &str {
        match self {
            Category::Deposit => "deposit",
            Category::Withdraw => "withdraw",
            Category::Invoice => "invoice",
            Category::Tip => "tip",
            Category::Bonus => "bonus",
            Category::UndoInvoice => "undo-invoice",
            Category::UndoTip => "undo-tip",
            Category::Label(name) => name,
        }
    }

    /// Parses a storage tag back into a category.
    ///
    /// Unknown tags are named transaction labels; the system categories
    /// are a closed set.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "deposit" => Category::Deposit,
            "withdraw" => Category::Withdraw,
            "invoice" => Category::Invoice,
            "tip" => Category::Tip,
            "bonus" => Category::Bonus,
            "undo-invoice" => Category::UndoInvoice,
            "undo-tip" => Category::UndoTip,
            other => Category::Label(other.to_string()),
        }
    }

    /// Whether an event of this category may be physically removed again.
    ///
    /// Deposits, withdrawals and named labels are manual human actions
    /// that must be correctable without leaving a wrong event behind.
    /// System-derived events (invoice, tip, bonus, compensations) stay
    /// auditable and are only ever reversed by compensating events.
    pub fn is_manually_reversible(&self) -> bool {
        matches!(
            self,
            Category::Deposit | Category::Withdraw | Category::Label(_)
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Categories serialize as their plain text tag.
impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Category::from_tag(&tag))
    }
}

// =============================================================================
// Event Kind
// =============================================================================

/// Direction of a ledger event. The sign lives here, never in `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Adds to the balance.
    Increase,
    /// Subtracts from the balance; may drive it negative.
    Decrease,
}

impl EventKind {
    /// Sign factor for balance arithmetic.
    #[inline]
    pub const fn sign(&self) -> i64 {
        match self {
            EventKind::Increase => 1,
            EventKind::Decrease => -1,
        }
    }
}

// =============================================================================
// Ledger Event
// =============================================================================

/// An immutable, balance-affecting record in the money ledger.
///
/// Created only by posting; never mutated. Logically reversed by a
/// compensating event, or physically removed through the single
/// undo-transfer path for manually-reversible categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Sequence id, assigned by the ledger. Unique and ordered.
    pub id: i64,
    pub account: i64,
    /// Customer / subject the event belongs to.
    pub depot: i64,
    /// Payment-method / channel tag.
    pub asset: i64,
    /// Linked order, 0 when the event is not order-linked.
    pub order_id: i64,
    pub kind: EventKind,
    /// Non-negative minor currency units.
    pub value: i64,
    pub category: Category,
    pub created_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// The event's contribution to a running balance.
    #[inline]
    pub fn signed_value(&self) -> i64 {
        self.kind.sign() * self.value
    }
}

// =============================================================================
// Ledger Entry (posting input)
// =============================================================================

/// Input for posting a new ledger event. The ledger assigns id and, unless
/// `at` is set, the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account: i64,
    pub depot: i64,
    pub asset: i64,
    /// Linked order, 0 when not order-linked.
    pub order_id: i64,
    /// Non-negative minor currency units. Negative values are rejected at
    /// posting time, never negated.
    pub value: i64,
    pub category: Category,
    /// Explicit event timestamp. The bonus engine dates rebates at month
    /// end; everything else posts at "now".
    pub at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Creates an entry not linked to any order, timestamped at post time.
    pub fn new(account: i64, depot: i64, asset: i64, value: i64, category: Category) -> Self {
        LedgerEntry {
            account,
            depot,
            asset,
            order_id: 0,
            value,
            category,
            at: None,
        }
    }

    /// Links the entry to an order.
    pub fn for_order(mut self, order_id: i64) -> Self {
        self.order_id = order_id;
        self
    }

    /// Sets an explicit event timestamp.
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }
}

// =============================================================================
// Balance Snapshot
// =============================================================================

/// A rolled-forward balance history row, written by the periodic history
/// rollup and served by limited balance queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct BalanceSnapshot {
    pub account: i64,
    pub depot: i64,
    pub asset: i64,
    /// Signed balance; negative balances are permitted.
    pub balance: i64,
    pub snapped_at: DateTime<Utc>,
}

// =============================================================================
// Order State
// =============================================================================

/// Lifecycle state of an order.
///
/// `Open → Closed` on settlement; `Closed → Open` on reopen (which must
/// reverse the settlement's ledger effect). An Open order with zero lines
/// is expected to be deleted by the caller, not left dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Line items may be mutated; the order may be deleted.
    Open,
    /// Settled. Line items are frozen; only reopen may follow.
    Closed,
}

impl Default for OrderState {
    fn default() -> Self {
        OrderState::Open
    }
}

// =============================================================================
// Order
// =============================================================================

/// An in-progress or settled sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: i64,
    pub account: i64,
    pub customer: i64,
    pub state: OrderState,
    /// Payment-method tag, recorded on close.
    pub payment_method: i64,
    /// Tip in minor units, set only on close and cleared on reopen.
    pub tip: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Whether line items may currently be mutated.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == OrderState::Open
    }
}

// =============================================================================
// Order Line
// =============================================================================

/// A product line of an order, keyed by (order_id, product).
///
/// ## Snapshot Pattern
/// `price` is the discounted unit price at order time. It is never
/// re-derived from the product later; repeat orders only accumulate
/// `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderLine {
    pub order_id: i64,
    pub product: i64,
    /// Unit price after discount, in minor units.
    pub price: i64,
    /// Quantity, always > 0. Additive on repeated ordering.
    pub amount: i64,
}

impl OrderLine {
    /// This line's contribution to the invoice.
    #[inline]
    pub fn total(&self) -> i64 {
        self.price * self.amount
    }
}

// =============================================================================
// Line Update
// =============================================================================

/// Partial update of an order line. Absent fields keep their value; an
/// update with neither field is a reported no-op, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineUpdate {
    pub amount: Option<i64>,
    pub price: Option<i64>,
}

impl LineUpdate {
    /// Update that only changes the quantity.
    pub fn amount(amount: i64) -> Self {
        LineUpdate {
            amount: Some(amount),
            price: None,
        }
    }

    /// Update that only changes the snapshotted price.
    pub fn price(price: i64) -> Self {
        LineUpdate {
            amount: None,
            price: Some(price),
        }
    }

    /// True when no field is supplied.
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.price.is_none()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_tags_round_trip() {
        let all = [
            Category::Deposit,
            Category::Withdraw,
            Category::Invoice,
            Category::Tip,
            Category::Bonus,
            Category::UndoInvoice,
            Category::UndoTip,
            Category::Label("club-fee".to_string()),
        ];
        for category in all {
            assert_eq!(Category::from_tag(category.as_tag()), category);
        }
    }

    #[test]
    fn test_category_serializes_as_tag() {
        let json = serde_json::to_string(&Category::UndoInvoice).unwrap();
        assert_eq!(json, "\"undo-invoice\"");

        let parsed: Category = serde_json::from_str("\"club-fee\"").unwrap();
        assert_eq!(parsed, Category::Label("club-fee".to_string()));
    }

    #[test]
    fn test_manually_reversible_set() {
        assert!(Category::Deposit.is_manually_reversible());
        assert!(Category::Withdraw.is_manually_reversible());
        assert!(Category::Label("club-fee".to_string()).is_manually_reversible());

        assert!(!Category::Invoice.is_manually_reversible());
        assert!(!Category::Tip.is_manually_reversible());
        assert!(!Category::Bonus.is_manually_reversible());
        assert!(!Category::UndoInvoice.is_manually_reversible());
        assert!(!Category::UndoTip.is_manually_reversible());
    }

    #[test]
    fn test_event_signed_value() {
        let mut event = LedgerEvent {
            id: 1,
            account: 1,
            depot: 7,
            asset: 1,
            order_id: 0,
            kind: EventKind::Increase,
            value: 250,
            category: Category::Deposit,
            created_at: Utc::now(),
        };
        assert_eq!(event.signed_value(), 250);

        event.kind = EventKind::Decrease;
        assert_eq!(event.signed_value(), -250);
    }

    #[test]
    fn test_ledger_event_json_shape() {
        let event = LedgerEvent {
            id: 42,
            account: 1,
            depot: 7,
            asset: 2,
            order_id: 9,
            kind: EventKind::Decrease,
            value: 500,
            category: Category::Invoice,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "decrease");
        assert_eq!(json["category"], "invoice");
        assert_eq!(json["value"], 500);
    }

    #[test]
    fn test_line_update_emptiness() {
        assert!(LineUpdate::default().is_empty());
        assert!(!LineUpdate::amount(3).is_empty());
        assert!(!LineUpdate::price(142).is_empty());
    }

    #[test]
    fn test_order_line_total() {
        let line = OrderLine {
            order_id: 1,
            product: 5,
            price: 120,
            amount: 20,
        };
        assert_eq!(line.total(), 2400);
    }
}
