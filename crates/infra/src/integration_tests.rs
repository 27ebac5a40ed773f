//! Integration tests for the full apply pipeline.
//!
//! Tests: Request → Gate → AccountStore → settle → LedgerStore::append → Statement
//!
//! Verifies:
//! - Concurrent debits never push an account below its floor
//! - The stored balance always equals the fold of the log
//! - Balance conflicts from outside the gate are re-evaluated, not lost
//! - A statement read mid-write pairs its balance with the matching listing

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    use saldo_core::{Account, AccountId, TransactionKind, TransactionRequest};

    use crate::config::EngineSettings;
    use crate::engine::{LedgerEngine, LedgerError};
    use crate::seed::{REFERENCE_ACCOUNTS, seed_accounts};
    use crate::store::{
        AccountStore, Appended, InMemoryLedgerStore, LedgerStore, PendingTransaction, Posting,
        StoreError, Transaction, TransactionLog,
    };

    fn id(raw: i32) -> AccountId {
        AccountId::new(raw)
    }

    async fn seeded() -> Arc<LedgerEngine<Arc<InMemoryLedgerStore>>> {
        let store = Arc::new(InMemoryLedgerStore::new());
        seed_accounts(&store, &REFERENCE_ACCOUNTS).await.unwrap();
        Arc::new(LedgerEngine::new(store, EngineSettings::default()))
    }

    /// Store wrapper that lets another writer slip a credit in right before
    /// the next `interferences` appends, the way a second service instance
    /// sharing the database would.
    struct OutsideWriterStore {
        inner: InMemoryLedgerStore,
        interferences: AtomicU32,
    }

    impl OutsideWriterStore {
        fn new(interferences: u32) -> Self {
            Self {
                inner: InMemoryLedgerStore::new(),
                interferences: AtomicU32::new(interferences),
            }
        }

        async fn outside_credit(&self, account_id: AccountId) -> Result<(), StoreError> {
            let current = self.inner.get(account_id).await?.balance();
            self.inner
                .append(Posting {
                    transaction: PendingTransaction {
                        id: Uuid::now_v7(),
                        account_id,
                        value: 1,
                        kind: TransactionKind::Credit,
                        description: "outside".to_string(),
                        created_at: Utc::now(),
                    },
                    expected_balance: current,
                    new_balance: current + 1,
                })
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl AccountStore for OutsideWriterStore {
        async fn create(&self, id: AccountId, limit: i64) -> Result<Account, StoreError> {
            self.inner.create(id, limit).await
        }

        async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
            self.inner.get(id).await
        }

        async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
            self.inner.get_all().await
        }

        async fn exists(&self, id: AccountId) -> Result<bool, StoreError> {
            self.inner.exists(id).await
        }
    }

    #[async_trait]
    impl TransactionLog for OutsideWriterStore {
        async fn query(
            &self,
            account_id: AccountId,
            before: Option<DateTime<Utc>>,
            max_count: usize,
        ) -> Result<Vec<Transaction>, StoreError> {
            self.inner.query(account_id, before, max_count).await
        }

        async fn replay_balance(&self, account_id: AccountId) -> Result<i64, StoreError> {
            self.inner.replay_balance(account_id).await
        }
    }

    #[async_trait]
    impl LedgerStore for OutsideWriterStore {
        async fn append(&self, posting: Posting) -> Result<Appended, StoreError> {
            let interfere = self
                .interferences
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if interfere {
                self.outside_credit(posting.transaction.account_id).await?;
            }
            self.inner.append(posting).await
        }

        async fn snapshot(
            &self,
            account_id: AccountId,
            max_count: usize,
        ) -> Result<(Account, Vec<Transaction>), StoreError> {
            self.inner.snapshot(account_id, max_count).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_debits_stop_exactly_at_the_floor() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = Arc::new(LedgerEngine::new(store.clone(), EngineSettings::default()));
        engine.create_account(id(1), 10_000).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .apply_transaction(id(1), TransactionRequest::debit(1_000, format!("d{i}")))
                    .await
            }));
        }

        let mut accepted = 0;
        let mut rejected = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(view) => {
                    assert!(view.balance >= -10_000);
                    accepted += 1;
                }
                Err(LedgerError::LimitExceeded { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(accepted, 10);
        assert_eq!(rejected, 40);
        assert_eq!(store.get(id(1)).await.unwrap().balance(), -10_000);
        assert_eq!(store.query(id(1), None, 100).await.unwrap().len(), 10);
        assert!(engine.audit(id(1)).await.unwrap().is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn mixed_traffic_across_accounts_keeps_every_ledger_consistent() {
        let engine = seeded().await;

        let mut handles = Vec::new();
        for i in 0..200i64 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let account = id((i % 5) as i32 + 1);
                let request = if i % 3 == 0 {
                    TransactionRequest::credit(7_000 + i, "in")
                } else {
                    TransactionRequest::debit(9_000 + i, "out")
                };
                engine.apply_transaction(account, request).await
            }));
        }
        for h in handles {
            match h.await.unwrap() {
                Ok(_) | Err(LedgerError::LimitExceeded { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        for (raw, limit) in REFERENCE_ACCOUNTS {
            let report = engine.audit(id(raw)).await.unwrap();
            assert!(report.is_consistent(), "account {raw}: {report:?}");
            assert!(report.stored_balance >= -limit);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn statements_taken_during_writes_are_self_consistent() {
        let engine = Arc::new(LedgerEngine::new(
            Arc::new(InMemoryLedgerStore::new()),
            EngineSettings::default(),
        ));
        engine.create_account(id(1), 5_000).await.unwrap();

        let mut writers = Vec::new();
        for w in 0..4i64 {
            let engine = engine.clone();
            writers.push(tokio::spawn(async move {
                for i in 0..150i64 {
                    let request = if (i + w) % 2 == 0 {
                        TransactionRequest::debit(300 + w, "out")
                    } else {
                        TransactionRequest::credit(200 + i, "in")
                    };
                    match engine.apply_transaction(id(1), request).await {
                        Ok(_) | Err(LedgerError::LimitExceeded { .. }) => {}
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
            }));
        }

        let mut readers = Vec::new();
        for _ in 0..3 {
            let engine = engine.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let statement = engine.get_statement(id(1), Some(10_000)).await.unwrap();
                    let folded: i64 = statement.transactions.iter().map(Transaction::signed_value).sum();
                    assert_eq!(statement.balance, folded, "balance and listing disagree");
                    assert!(statement.balance >= -statement.limit);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for h in writers {
            h.await.unwrap();
        }
        for h in readers {
            h.await.unwrap();
        }

        let last = engine.get_statement(id(1), Some(10_000)).await.unwrap();
        assert!(!last.transactions.is_empty());
        assert!(engine.audit(id(1)).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn outside_write_is_re_evaluated_against_the_fresh_balance() {
        let engine = LedgerEngine::new(OutsideWriterStore::new(1), EngineSettings::default());
        engine.create_account(id(1), 0).await.unwrap();

        // The outside credit of 1 lands first; the debit then fits exactly.
        let view = engine
            .apply_transaction(id(1), TransactionRequest::debit(1, "retry"))
            .await
            .unwrap();
        assert_eq!(view.balance, 0);

        let statement = engine.get_statement(id(1), None).await.unwrap();
        let descriptions: Vec<&str> = statement
            .transactions
            .iter()
            .map(|t| t.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["retry", "outside"]);
    }

    #[tokio::test]
    async fn persistent_conflicts_give_up_without_writing() {
        let settings = EngineSettings {
            max_commit_attempts: 3,
            ..EngineSettings::default()
        };
        let engine = LedgerEngine::new(OutsideWriterStore::new(10), settings);
        engine.create_account(id(1), 100).await.unwrap();

        let err = engine
            .apply_transaction(id(1), TransactionRequest::debit(5, "mine"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Conflict(_))));

        let statement = engine.get_statement(id(1), Some(20)).await.unwrap();
        assert_eq!(statement.balance, 3);
        assert!(statement.transactions.iter().all(|t| t.description == "outside"));
    }

    #[tokio::test]
    async fn statement_reflects_every_committed_transaction_and_nothing_else() {
        let engine = seeded().await;
        engine
            .apply_transaction(id(2), TransactionRequest::debit(80_000, "all in"))
            .await
            .unwrap();
        let _ = engine
            .apply_transaction(id(2), TransactionRequest::debit(1, "over"))
            .await;
        let _ = engine
            .apply_transaction(id(2), TransactionRequest::credit(1, "toolongtext"))
            .await;

        let statement = engine.get_statement(id(2), None).await.unwrap();
        assert_eq!(statement.limit, 80_000);
        assert_eq!(statement.balance, -80_000);
        assert_eq!(statement.transactions.len(), 1);
        assert_eq!(statement.transactions[0].kind, TransactionKind::Debit);
        assert_eq!(statement.transactions[0].value, 80_000);
    }

    fn op() -> impl Strategy<Value = (bool, i64)> {
        (any::<bool>(), 1i64..5_000)
    }

    proptest! {
        #[test]
        fn sequential_history_matches_a_simple_model(limit in 0i64..20_000, ops in prop::collection::vec(op(), 0..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let engine = LedgerEngine::new(InMemoryLedgerStore::new(), EngineSettings::default());
                engine.create_account(id(1), limit).await.unwrap();

                let mut model = 0i64;
                let mut committed = 0usize;
                for (is_credit, value) in ops {
                    let request = if is_credit {
                        TransactionRequest::credit(value, "c")
                    } else {
                        TransactionRequest::debit(value, "d")
                    };
                    let expected_ok = is_credit || model - value >= -limit;
                    let result = engine.apply_transaction(id(1), request).await;
                    prop_assert_eq!(result.is_ok(), expected_ok);
                    if expected_ok {
                        model += if is_credit { value } else { -value };
                        committed += 1;
                    }
                }

                let report = engine.audit(id(1)).await.unwrap();
                prop_assert_eq!(report.stored_balance, model);
                prop_assert_eq!(report.replayed_balance, model);
                prop_assert!(model >= -limit);

                let statement = engine.get_statement(id(1), None).await.unwrap();
                prop_assert_eq!(statement.transactions.len(), committed.min(10));
                Ok(())
            })?;
        }
    }
}
