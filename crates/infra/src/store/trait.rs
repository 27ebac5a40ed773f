use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use saldo_core::{Account, AccountId, TransactionKind};

pub use saldo_core::Transaction;

/// A transaction accepted by the engine, not yet assigned a sequence number.
///
/// `PendingTransaction` is what the engine hands to [`LedgerStore::append`]
/// once the limit check passed. The store assigns `sequence` and may move
/// `created_at` forward so that an account's log never goes back in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub account_id: AccountId,
    pub value: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One atomic ledger mutation: append `transaction` and move the balance
/// from `expected_balance` to `new_balance`.
///
/// `expected_balance` is a compare-and-set guard. If the stored balance is no
/// longer the one the engine validated against, nothing is written and the
/// store answers [`StoreError::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub transaction: PendingTransaction,
    pub expected_balance: i64,
    pub new_balance: i64,
}

/// Result of a committed [`Posting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub account: Account,
    pub transaction: Transaction,
}

/// Ledger storage error.
///
/// These are **infrastructure errors**. `AccountNotFound` and `AccountExists`
/// are mapped to domain outcomes by the engine; `Conflict` triggers a
/// re-evaluation; `Backend` is surfaced as an unexpected failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("account {0} already exists")]
    AccountExists(AccountId),

    #[error("balance changed concurrently: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Accounts and their limits.
///
/// There is deliberately no update operation: balances change only through
/// [`LedgerStore::append`], together with the log entry that explains them.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an account with a zero balance (bootstrap only).
    async fn create(&self, id: AccountId, limit: i64) -> Result<Account, StoreError>;

    async fn get(&self, id: AccountId) -> Result<Account, StoreError>;

    async fn get_all(&self) -> Result<Vec<Account>, StoreError>;

    async fn exists(&self, id: AccountId) -> Result<bool, StoreError>;
}

/// Append-only, per-account transaction history.
///
/// Writes go through [`LedgerStore::append`]; this trait only exposes reads.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Up to `max_count` transactions with `created_at <= before` (no filter
    /// when `None`), most recent first, ties broken by newest sequence.
    async fn query(
        &self,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Balance derived by folding the whole log of an account.
    async fn replay_balance(&self, account_id: AccountId) -> Result<i64, StoreError>;
}

/// The storage capability set the ledger engine is written against.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - make `append` all-or-nothing (log entry and balance together, or neither)
/// - refuse `append` with `Conflict` when `expected_balance` is stale
/// - assign strictly increasing `sequence` numbers
/// - keep each account's `created_at` non-decreasing in sequence order
/// - serve `snapshot` so the balance and the listed transactions come from
///   the same committed state
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionLog {
    async fn append(&self, posting: Posting) -> Result<Appended, StoreError>;

    async fn snapshot(
        &self,
        account_id: AccountId,
        max_count: usize,
    ) -> Result<(Account, Vec<Transaction>), StoreError>;
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn create(&self, id: AccountId, limit: i64) -> Result<Account, StoreError> {
        (**self).create(id, limit).await
    }

    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        (**self).get(id).await
    }

    async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
        (**self).get_all().await
    }

    async fn exists(&self, id: AccountId) -> Result<bool, StoreError> {
        (**self).exists(id).await
    }
}

#[async_trait]
impl<S> TransactionLog for Arc<S>
where
    S: TransactionLog + ?Sized,
{
    async fn query(
        &self,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        (**self).query(account_id, before, max_count).await
    }

    async fn replay_balance(&self, account_id: AccountId) -> Result<i64, StoreError> {
        (**self).replay_balance(account_id).await
    }
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn append(&self, posting: Posting) -> Result<Appended, StoreError> {
        (**self).append(posting).await
    }

    async fn snapshot(
        &self,
        account_id: AccountId,
        max_count: usize,
    ) -> Result<(Account, Vec<Transaction>), StoreError> {
        (**self).snapshot(account_id, max_count).await
    }
}
