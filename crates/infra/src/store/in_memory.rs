use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use saldo_core::{Account, AccountId, Entity, Transaction};

use super::r#trait::{AccountStore, Appended, LedgerStore, Posting, StoreError, TransactionLog};

/// One account and its log, guarded together.
#[derive(Debug)]
struct AccountBook {
    account: Account,
    /// Ascending by `(created_at, sequence)`; `append` keeps it that way.
    entries: Vec<Transaction>,
}

/// In-memory ledger store.
///
/// Each account lives in its own `RwLock`, so appends on different accounts
/// never contend and a snapshot of one account never sees half an append.
/// The outer map is only written when accounts are created.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    books: RwLock<HashMap<AccountId, Arc<RwLock<AccountBook>>>>,
    sequence: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, id: AccountId) -> Result<Arc<RwLock<AccountBook>>, StoreError> {
        let books = self.books.read().map_err(|_| poisoned())?;
        books.get(&id).cloned().ok_or(StoreError::AccountNotFound(id))
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn poisoned() -> StoreError {
    StoreError::backend("lock poisoned")
}

fn recent(entries: &[Transaction], before: Option<DateTime<Utc>>, max_count: usize) -> Vec<Transaction> {
    entries
        .iter()
        .rev()
        .filter(|t| before.is_none_or(|cutoff| t.created_at <= cutoff))
        .take(max_count)
        .cloned()
        .collect()
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn create(&self, id: AccountId, limit: i64) -> Result<Account, StoreError> {
        let account = Account::open(id, limit).map_err(|e| StoreError::backend(e.to_string()))?;

        let mut books = self.books.write().map_err(|_| poisoned())?;
        if books.contains_key(&id) {
            return Err(StoreError::AccountExists(id));
        }
        books.insert(
            id,
            Arc::new(RwLock::new(AccountBook {
                account,
                entries: Vec::new(),
            })),
        );

        Ok(account)
    }

    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        let book = self.book(id)?;
        let book = book.read().map_err(|_| poisoned())?;
        Ok(book.account)
    }

    async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
        let books = self.books.read().map_err(|_| poisoned())?;
        let mut accounts = Vec::with_capacity(books.len());
        for (_, book) in books.iter() {
            accounts.push(book.read().map_err(|_| poisoned())?.account);
        }
        accounts.sort_by_key(|a| a.id().get());
        Ok(accounts)
    }

    async fn exists(&self, id: AccountId) -> Result<bool, StoreError> {
        let books = self.books.read().map_err(|_| poisoned())?;
        Ok(books.contains_key(&id))
    }
}

#[async_trait]
impl TransactionLog for InMemoryLedgerStore {
    async fn query(
        &self,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let book = self.book(account_id)?;
        let book = book.read().map_err(|_| poisoned())?;
        Ok(recent(&book.entries, before, max_count))
    }

    async fn replay_balance(&self, account_id: AccountId) -> Result<i64, StoreError> {
        let book = self.book(account_id)?;
        let book = book.read().map_err(|_| poisoned())?;
        Ok(book.entries.iter().map(Transaction::signed_value).sum())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, posting: Posting) -> Result<Appended, StoreError> {
        let Posting {
            transaction: pending,
            expected_balance,
            new_balance,
        } = posting;

        let book = self.book(pending.account_id)?;
        let mut book = book.write().map_err(|_| poisoned())?;

        let current = book.account.balance();
        if current != expected_balance {
            return Err(StoreError::Conflict(format!(
                "account {}: expected balance {expected_balance}, found {current}",
                pending.account_id
            )));
        }
        if current.checked_add(pending.value * pending.kind.sign()) != Some(new_balance) {
            return Err(StoreError::backend(format!(
                "posting does not add up: {current} {} {} != {new_balance}",
                pending.kind, pending.value
            )));
        }
        if new_balance < book.account.floor() {
            return Err(StoreError::backend(format!(
                "posting would move account {} below its floor",
                pending.account_id
            )));
        }

        let created_at = match book.entries.last() {
            Some(last) if last.created_at > pending.created_at => last.created_at,
            _ => pending.created_at,
        };

        let transaction = Transaction {
            id: pending.id,
            account_id: pending.account_id,
            sequence: self.next_sequence(),
            value: pending.value,
            kind: pending.kind,
            description: pending.description,
            created_at,
        };

        book.entries.push(transaction.clone());
        book.account = book.account.with_balance(new_balance);

        Ok(Appended {
            account: book.account,
            transaction,
        })
    }

    async fn snapshot(
        &self,
        account_id: AccountId,
        max_count: usize,
    ) -> Result<(Account, Vec<Transaction>), StoreError> {
        let book = self.book(account_id)?;
        let book = book.read().map_err(|_| poisoned())?;
        Ok((book.account, recent(&book.entries, None, max_count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PendingTransaction;
    use chrono::Duration;
    use saldo_core::TransactionKind;
    use uuid::Uuid;

    fn id(raw: i32) -> AccountId {
        AccountId::new(raw)
    }

    fn pending(account: i32, value: i64, kind: TransactionKind, at: DateTime<Utc>) -> PendingTransaction {
        PendingTransaction {
            id: Uuid::now_v7(),
            account_id: id(account),
            value,
            kind,
            description: "test".to_string(),
            created_at: at,
        }
    }

    async fn post(
        store: &InMemoryLedgerStore,
        account: i32,
        value: i64,
        kind: TransactionKind,
        at: DateTime<Utc>,
    ) -> Result<Appended, StoreError> {
        let current = store.get(id(account)).await?.balance();
        store
            .append(Posting {
                transaction: pending(account, value, kind, at),
                expected_balance: current,
                new_balance: current + value * kind.sign(),
            })
            .await
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 100).await.unwrap();
        let err = store.create(id(1), 200).await.unwrap_err();
        assert!(matches!(err, StoreError::AccountExists(a) if a == id(1)));
        assert_eq!(store.get(id(1)).await.unwrap().limit(), 100);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found_everywhere() {
        let store = InMemoryLedgerStore::new();
        assert!(matches!(store.get(id(9)).await, Err(StoreError::AccountNotFound(_))));
        assert!(matches!(store.query(id(9), None, 10).await, Err(StoreError::AccountNotFound(_))));
        assert!(matches!(store.snapshot(id(9), 10).await, Err(StoreError::AccountNotFound(_))));
        assert!(!store.exists(id(9)).await.unwrap());
    }

    #[tokio::test]
    async fn get_all_lists_accounts_in_id_order() {
        let store = InMemoryLedgerStore::new();
        for raw in [3, 1, 2] {
            store.create(id(raw), 10).await.unwrap();
        }
        let ids: Vec<i32> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|a| a.id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stale_expected_balance_is_a_conflict_and_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 100).await.unwrap();
        post(&store, 1, 10, TransactionKind::Credit, Utc::now()).await.unwrap();

        let err = store
            .append(Posting {
                transaction: pending(1, 5, TransactionKind::Debit, Utc::now()),
                expected_balance: 0,
                new_balance: -5,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(id(1)).await.unwrap().balance(), 10);
        assert_eq!(store.query(id(1), None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn posting_below_floor_is_refused() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 10).await.unwrap();
        let err = post(&store, 1, 11, TransactionKind::Debit, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.replay_balance(id(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sequences_increase_across_accounts() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 0).await.unwrap();
        store.create(id(2), 0).await.unwrap();
        let a = post(&store, 1, 1, TransactionKind::Credit, Utc::now()).await.unwrap();
        let b = post(&store, 2, 1, TransactionKind::Credit, Utc::now()).await.unwrap();
        let c = post(&store, 1, 1, TransactionKind::Credit, Utc::now()).await.unwrap();
        assert!(a.transaction.sequence < b.transaction.sequence);
        assert!(b.transaction.sequence < c.transaction.sequence);
    }

    #[tokio::test]
    async fn created_at_never_goes_backwards_within_an_account() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 0).await.unwrap();
        let now = Utc::now();
        post(&store, 1, 1, TransactionKind::Credit, now).await.unwrap();
        let late = post(&store, 1, 2, TransactionKind::Credit, now - Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(late.transaction.created_at, now);

        let listed = store.query(id(1), None, 10).await.unwrap();
        assert_eq!(listed[0].value, 2);
        assert_eq!(listed[1].value, 1);
    }

    #[tokio::test]
    async fn query_filters_by_cutoff_and_caps_count() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 0).await.unwrap();
        let start = Utc::now();
        for i in 0..5 {
            post(&store, 1, i + 1, TransactionKind::Credit, start + Duration::seconds(i))
                .await
                .unwrap();
        }

        let before = store
            .query(id(1), Some(start + Duration::seconds(2)), 10)
            .await
            .unwrap();
        let values: Vec<i64> = before.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![3, 2, 1]);

        let capped = store.query(id(1), None, 2).await.unwrap();
        let values: Vec<i64> = capped.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![5, 4]);
    }

    #[tokio::test]
    async fn replayed_balance_matches_stored_balance() {
        let store = InMemoryLedgerStore::new();
        store.create(id(1), 1000).await.unwrap();
        post(&store, 1, 300, TransactionKind::Debit, Utc::now()).await.unwrap();
        post(&store, 1, 100, TransactionKind::Credit, Utc::now()).await.unwrap();
        post(&store, 1, 50, TransactionKind::Debit, Utc::now()).await.unwrap();

        let (account, listed) = store.snapshot(id(1), 10).await.unwrap();
        assert_eq!(account.balance(), -250);
        assert_eq!(store.replay_balance(id(1)).await.unwrap(), -250);
        assert_eq!(listed.len(), 3);
    }
}
