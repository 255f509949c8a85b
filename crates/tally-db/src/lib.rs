//! # Tally Database Layer
//!
//! SQLite persistence for the Tally POS back-office core.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         tally-db                                    │
//! │                                                                     │
//! │  Database (pool.rs) ── SqlitePool, WAL, embedded migrations         │
//! │      │                                                              │
//! │      ├── LedgerRepository     append-only money ledger              │
//! │      ├── OrderRepository      order lifecycle + product lines       │
//! │      ├── SettlementCoordinator  close / reopen, ledger posting      │
//! │      └── BonusEngine          monthly bonus walk                    │
//! │                                                                     │
//! │  Depends on: tally-core (domain types), sqlx (SQLite)               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. **The ledger is the source of truth for money** - balances are
//!    sums over events, never stored counters
//! 2. **Check-and-flip over read-then-write** - state transitions are
//!    single conditional UPDATEs; rows-affected reports who won
//! 3. **Coordinators compose repository statements in one transaction** -
//!    a state flip and its ledger effect commit together

pub mod bonus;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod settlement;

pub use bonus::{BonusEngine, BonusPolicy};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::{BalanceQuery, EventFilter, EventSum, LedgerRepository, OrderRepository};
pub use settlement::{Settlement, SettlementCoordinator};
