//! Read-side views returned by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::id::AccountId;
use crate::transaction::Transaction;

/// Number of transactions a statement lists when the caller does not ask.
pub const DEFAULT_STATEMENT_SIZE: usize = 10;

/// Limit and balance right after a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub limit: i64,
    pub balance: i64,
}

impl From<&Account> for BalanceView {
    fn from(account: &Account) -> Self {
        Self {
            limit: account.limit(),
            balance: account.balance(),
        }
    }
}

/// Point-in-time view of an account and its most recent transactions.
///
/// `balance` and `transactions` always come from the same consistent read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub account_id: AccountId,
    pub limit: i64,
    pub balance: i64,
    /// When the read was served (not a transaction time).
    pub as_of: DateTime<Utc>,
    /// Most recent first.
    pub transactions: Vec<Transaction>,
}
