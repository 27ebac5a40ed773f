//! Reference accounts created at bootstrap.

use tracing::{debug, info};

use saldo_core::AccountId;

use crate::store::{AccountStore, StoreError};

/// `(id, limit)` pairs of the accounts every fresh deployment starts with.
pub const REFERENCE_ACCOUNTS: [(i32, i64); 5] = [
    (1, 100_000),
    (2, 80_000),
    (3, 100_000_000),
    (4, 10_000_000),
    (5, 500_000),
];

/// Create every missing account in `accounts`, zero balance.
///
/// Accounts that already exist are left untouched, so this can run on every
/// start. Returns how many accounts were created.
pub async fn seed_accounts<S>(store: &S, accounts: &[(i32, i64)]) -> Result<usize, StoreError>
where
    S: AccountStore + ?Sized,
{
    let mut created = 0;
    for &(raw_id, limit) in accounts {
        let id = AccountId::new(raw_id);
        match store.create(id, limit).await {
            Ok(_) => created += 1,
            Err(StoreError::AccountExists(_)) => debug!(account_id = %id, "account already present"),
            Err(e) => return Err(e),
        }
    }

    info!(created, total = accounts.len(), "reference accounts seeded");
    Ok(created)
}
