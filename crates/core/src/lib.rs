//! `saldo-core`: ledger domain building blocks.
//!
//! This crate contains **pure domain** types and rules (no IO, no locking).

pub mod account;
pub mod entity;
pub mod error;
pub mod id;
pub mod statement;
pub mod transaction;
pub mod value_object;

pub use account::Account;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::AccountId;
pub use statement::{BalanceView, DEFAULT_STATEMENT_SIZE, Statement};
pub use transaction::{
    Amount, DESCRIPTION_MAX_CHARS, Description, Transaction, TransactionKind, TransactionRequest,
    ValidatedTransaction,
};
pub use value_object::ValueObject;
