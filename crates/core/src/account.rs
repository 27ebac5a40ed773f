use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;
use crate::transaction::{Amount, TransactionKind};

/// A client account: fixed negative limit plus the current balance.
///
/// Invariant: `balance >= -limit`. The balance only moves through
/// [`Account::settle`] followed by a committed append in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AccountRecord")]
pub struct Account {
    id: AccountId,
    limit: i64,
    balance: i64,
}

/// Serialized shape of an [`Account`]; decoding goes through [`Account::restore`].
#[derive(Deserialize)]
struct AccountRecord {
    id: AccountId,
    limit: i64,
    balance: i64,
}

impl TryFrom<AccountRecord> for Account {
    type Error = DomainError;

    fn try_from(record: AccountRecord) -> DomainResult<Self> {
        Account::restore(record.id, record.limit, record.balance)
    }
}

impl Account {
    /// A fresh account with a zero balance.
    pub fn open(id: AccountId, limit: i64) -> DomainResult<Self> {
        if limit < 0 {
            return Err(DomainError::validation("limit must be non-negative"));
        }
        Ok(Self {
            id,
            limit,
            balance: 0,
        })
    }

    /// Rebuild an account from stored state.
    pub fn restore(id: AccountId, limit: i64, balance: i64) -> DomainResult<Self> {
        let account = Self::open(id, limit)?;
        if balance < account.floor() {
            return Err(DomainError::validation(format!(
                "stored balance {balance} is below -{limit} for account {id}"
            )));
        }
        Ok(Self { balance, ..account })
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// Lowest balance the account may reach.
    pub fn floor(&self) -> i64 {
        -self.limit
    }

    /// Candidate balance after applying `amount` in direction `kind`.
    ///
    /// Only debits are checked against the floor; credits can only raise the
    /// balance. Pure: the account itself is not modified.
    pub fn settle(&self, kind: TransactionKind, amount: Amount) -> DomainResult<i64> {
        let candidate = self
            .balance
            .checked_add(amount.signed(kind))
            .ok_or_else(|| DomainError::validation("balance would overflow"))?;

        if kind == TransactionKind::Debit && candidate < self.floor() {
            return Err(DomainError::LimitExceeded {
                limit: self.limit,
                balance: self.balance,
                value: amount.get(),
            });
        }

        Ok(candidate)
    }

    /// The same account at a new balance.
    ///
    /// Used by stores after a committed append; the caller is responsible for
    /// having obtained `balance` from [`Account::settle`].
    pub fn with_balance(self, balance: i64) -> Self {
        Self { balance, ..self }
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
