//! # Repository Layer
//!
//! Data access repositories for Tally POS.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Repository Pattern                             │
//! │                                                                     │
//! │  Database ──┬── LedgerRepository  (append-only money ledger)        │
//! │             └── OrderRepository   (order lifecycle + lines)         │
//! │                                                                     │
//! │  Each repository:                                                   │
//! │  - Holds a clone of the SqlitePool (cheap, Arc internally)          │
//! │  - Owns the SQL for its aggregate                                   │
//! │  - Exposes crate-internal statement helpers that run on any         │
//! │    executor, so the settlement and bonus coordinators can compose   │
//! │    them inside one transaction                                      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod ledger;
pub mod order;

pub use ledger::{BalanceQuery, EventFilter, EventSum, LedgerRepository};
pub use order::OrderRepository;
