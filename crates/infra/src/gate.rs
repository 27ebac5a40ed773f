//! Per-account mutual exclusion.
//!
//! The gate serializes the read-check-append sequence of each account while
//! leaving different accounts fully independent. Each account gets its own
//! async mutex, created the first time the account is touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use saldo_core::AccountId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("timed out after {waited:?} waiting for account {account_id}")]
    Timeout {
        account_id: AccountId,
        waited: Duration,
    },
}

/// Exclusive access to one account. Released on drop.
#[derive(Debug)]
pub struct AccountPermit {
    account_id: AccountId,
    _guard: OwnedMutexGuard<()>,
}

impl AccountPermit {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Registry of per-account locks with a bounded wait.
#[derive(Debug)]
pub struct AccountGate {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
    acquire_timeout: Duration,
}

impl AccountGate {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    fn lock_for(&self, account_id: AccountId) -> Arc<AsyncMutex<()>> {
        // The map only ever gains entries, so a poisoned guard is still coherent.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(account_id).or_default().clone()
    }

    /// Wait (at most the configured timeout) for exclusive access to `account_id`.
    ///
    /// A caller that gives up has not touched any state.
    pub async fn acquire(&self, account_id: AccountId) -> Result<AccountPermit, GateError> {
        let lock = self.lock_for(account_id);
        match tokio::time::timeout(self.acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(AccountPermit {
                account_id,
                _guard: guard,
            }),
            Err(_) => Err(GateError::Timeout {
                account_id,
                waited: self.acquire_timeout,
            }),
        }
    }

    /// Number of accounts that have been gated so far.
    pub fn tracked_accounts(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for AccountGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
