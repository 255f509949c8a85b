//! # Validation Module
//!
//! Input validation for the accounting core.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                              │
//! │                                                                     │
//! │  Layer 1: Calling command layer (outside this workspace)            │
//! │  ├── Parameter presence, id resolution                              │
//! │  └── Immediate user feedback                                        │
//! │           │                                                         │
//! │           ▼                                                         │
//! │  Layer 2: THIS MODULE - business rule validation                    │
//! │           │                                                         │
//! │           ▼                                                         │
//! │  Layer 3: Database (SQLite)                                         │
//! │  ├── CHECK (value >= 0), CHECK (amount > 0)                         │
//! │  └── Partial unique index (one open order per customer)             │
//! │                                                                     │
//! │  Defense in depth: multiple layers catch different errors           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};

// =============================================================================
// Monetary Validators
// =============================================================================

/// Validates a ledger event value.
///
/// ## Rules
/// - Must be non-negative (>= 0); the direction lives in the event kind
/// - Zero is allowed (a zero-value event is pointless but not wrong)
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_event_value;
///
/// assert!(validate_event_value(500).is_ok());
/// assert!(validate_event_value(0).is_ok());
/// assert!(validate_event_value(-100).is_err());
/// ```
pub fn validate_event_value(value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::Negative {
            field: "value".to_string(),
            value,
        });
    }

    Ok(())
}

/// Validates a snapshotted line price.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (free items)
pub fn validate_price(price: i64) -> ValidationResult<()> {
    if price < 0 {
        return Err(ValidationError::Negative {
            field: "price".to_string(),
            value: price,
        });
    }

    Ok(())
}

/// Validates a line amount (quantity).
///
/// ## Rules
/// - Must be positive (> 0); a line with zero amount is cancelled instead
pub fn validate_amount(amount: i64) -> ValidationResult<()> {
    if amount <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    Ok(())
}

/// Validates a discount percentage.
///
/// ## Rules
/// - Must be between 0 and 100; 0 means full price
pub fn validate_discount_percent(percent: i64) -> ValidationResult<()> {
    if !(0..=100).contains(&percent) {
        return Err(ValidationError::OutOfRange {
            field: "discount".to_string(),
            min: 0,
            max: 100,
        });
    }

    Ok(())
}

/// Validates that a paid amount covers an invoice.
///
/// The difference becomes the tip, so underpayment must be rejected
/// before the settlement path derives anything from it.
pub fn validate_paid_covers_invoice(paid: i64, invoice: i64) -> ValidationResult<()> {
    if paid < invoice {
        return Err(ValidationError::Underpaid { paid, invoice });
    }

    Ok(())
}

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a caller-supplied identifier (account, customer, product, order).
///
/// ## Rules
/// - Must be positive; ids are storage sequences or caller-assigned
///   small integers starting at 1 (0 is reserved for "no order")
pub fn validate_id(field: &str, id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_value() {
        assert!(validate_event_value(0).is_ok());
        assert!(validate_event_value(1099).is_ok());
        assert!(validate_event_value(-1).is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(0).is_ok());
        assert!(validate_price(142).is_ok());
        assert!(validate_price(-100).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1).is_ok());
        assert!(validate_amount(999).is_ok());
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-1).is_err());
    }

    #[test]
    fn test_validate_discount_percent() {
        assert!(validate_discount_percent(0).is_ok());
        assert!(validate_discount_percent(5).is_ok());
        assert!(validate_discount_percent(100).is_ok());
        assert!(validate_discount_percent(101).is_err());
        assert!(validate_discount_percent(-1).is_err());
    }

    #[test]
    fn test_validate_paid_covers_invoice() {
        assert!(validate_paid_covers_invoice(500, 500).is_ok());
        assert!(validate_paid_covers_invoice(550, 500).is_ok());
        assert!(validate_paid_covers_invoice(499, 500).is_err());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("order", 1).is_ok());
        assert!(validate_id("order", 0).is_err());
        assert!(validate_id("order", -5).is_err());
    }
}
