//! # Error Types
//!
//! Validation errors for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                 │
//! │                                                                     │
//! │  tally-core errors (this file)                                      │
//! │  └── ValidationError  - caller-supplied bad input, rejected         │
//! │                         before any mutation                         │
//! │                                                                     │
//! │  tally-db errors (separate crate)                                   │
//! │  └── DbError          - not-found / state-conflict / storage        │
//! │                                                                     │
//! │  Flow: ValidationError → DbError → calling layer → stable codes     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (field, value)
//! 3. Errors are enum variants, never String

use thiserror::Error;

/// Input validation errors.
///
/// These occur when caller-supplied input doesn't meet requirements.
/// They are raised before any mutation, so no partial state can result.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Value must be positive (> 0).
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative (>= 0). Negative amounts are rejected,
    /// never negated into the opposite event kind.
    #[error("{field} must not be negative, got {value}")]
    Negative { field: String, value: i64 },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Paid amount does not cover the invoice.
    #[error("amount paid {paid} is below the invoice total {invoice}")]
    Underpaid { paid: i64, invoice: i64 },
}

/// Convenience type alias for validation results.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::Negative {
            field: "value".to_string(),
            value: -100,
        };
        assert_eq!(err.to_string(), "value must not be negative, got -100");

        let err = ValidationError::Underpaid {
            paid: 400,
            invoice: 500,
        };
        assert_eq!(
            err.to_string(),
            "amount paid 400 is below the invoice total 500"
        );
    }
}
