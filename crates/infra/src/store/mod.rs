//! Account Store + Transaction Log boundary.
//!
//! The ledger engine is written once against [`LedgerStore`]; the in-memory
//! and Postgres backends are interchangeable behind it.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{
    AccountStore, Appended, LedgerStore, PendingTransaction, Posting, StoreError, Transaction,
    TransactionLog,
};
