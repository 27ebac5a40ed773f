//! Ledger engine: the single writer of balances and transactions.
//!
//! ## Apply Flow
//!
//! ```text
//! TransactionRequest
//!   ↓
//! 1. Validate fields (amount, kind, description); invalid input never takes a lock
//!   ↓
//! 2. Resolve the account; unknown ids never take a lock either
//!   ↓
//! 3. Acquire the account's gate (bounded wait)
//!   ↓
//! 4. Read the account, settle the candidate balance (limit check for debits)
//!   ↓
//! 5. Append transaction + new balance atomically, guarded by the balance read in 4
//!   ↓
//! 6. Release the gate (drop)
//! ```
//!
//! The gate keeps one lock per account it has seen, so only existing accounts
//! may reach it.
//!
//! Step 5 only fails with a conflict when something outside this process
//! wrote the same account (another service instance on the same database).
//! Steps 4-5 are then re-run against the fresh balance, a bounded number of
//! times. A rejected transaction is never retried.

use chrono::Utc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use saldo_core::{
    Account, AccountId, BalanceView, DomainError, Entity, Statement, TransactionRequest,
    ValidatedTransaction,
};

use crate::config::EngineSettings;
use crate::gate::{AccountGate, AccountPermit, GateError};
use crate::store::{LedgerStore, PendingTransaction, Posting, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Unknown account.
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// Malformed transaction fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The debit would move the balance below `-limit`.
    #[error("limit exceeded: balance {balance} - {value} is below -{limit}")]
    LimitExceeded { limit: i64, balance: i64, value: i64 },

    /// Duplicate account at bootstrap.
    #[error("account {0} already exists")]
    AlreadyExists(AccountId),

    /// The account stayed busy longer than the configured wait.
    #[error(transparent)]
    GateTimeout(#[from] GateError),

    /// Storage failed underneath the engine.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    /// `true` for the four business outcomes, `false` for infrastructure failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_)
                | LedgerError::InvalidInput(_)
                | LedgerError::LimitExceeded { .. }
                | LedgerError::AlreadyExists(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::AccountNotFound(id) => LedgerError::NotFound(id),
            StoreError::AccountExists(id) => LedgerError::AlreadyExists(id),
            other => LedgerError::Store(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::InvalidInput(msg)
            }
            DomainError::LimitExceeded {
                limit,
                balance,
                value,
            } => LedgerError::LimitExceeded {
                limit,
                balance,
                value,
            },
        }
    }
}

/// Stored balance next to the balance replayed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub account_id: AccountId,
    pub stored_balance: i64,
    pub replayed_balance: i64,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.replayed_balance
    }
}

/// Backend-agnostic ledger engine.
///
/// `S` is any [`LedgerStore`]; the engine adds the per-account gate and the
/// limit rule on top of it. Share it behind an `Arc`.
#[derive(Debug)]
pub struct LedgerEngine<S> {
    store: S,
    gate: AccountGate,
    settings: EngineSettings,
}

impl<S> LedgerEngine<S> {
    pub fn new(store: S, settings: EngineSettings) -> Self {
        Self {
            store,
            gate: AccountGate::new(settings.gate_timeout),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gate(&self) -> &AccountGate {
        &self.gate
    }

}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    /// Apply one credit or debit to `account_id`.
    ///
    /// Returns the account's limit and new balance. On any error the account
    /// and its log are exactly as they were before the call.
    pub async fn apply_transaction(
        &self,
        account_id: AccountId,
        request: TransactionRequest,
    ) -> Result<BalanceView, LedgerError> {
        let span = info_span!(
            "apply_transaction",
            account_id = %account_id,
            kind = %request.kind,
            value = request.value
        );

        async {
            let result = self.apply_inner(account_id, &request).await;
            if let Err(e) = &result {
                log_failure("transaction rejected", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn apply_inner(
        &self,
        account_id: AccountId,
        request: &TransactionRequest,
    ) -> Result<BalanceView, LedgerError> {
        let validated = request.validate()?;
        let _permit = self.acquire_existing(account_id).await?;

        let mut attempt: u32 = 1;
        loop {
            let account = self.store.get(account_id).await?;
            let posting = self.posting_for(&account, &validated)?;

            match self.store.append(posting).await {
                Ok(appended) => {
                    debug!(
                        sequence = appended.transaction.sequence,
                        balance = appended.account.balance(),
                        "transaction committed"
                    );
                    return Ok(BalanceView::from(&appended.account));
                }
                Err(StoreError::Conflict(msg)) if attempt < self.settings.max_commit_attempts => {
                    warn!(attempt, %msg, "balance changed outside the gate; re-evaluating");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn acquire_existing(&self, account_id: AccountId) -> Result<AccountPermit, LedgerError> {
        if !self.store.exists(account_id).await? {
            return Err(LedgerError::NotFound(account_id));
        }
        Ok(self.gate.acquire(account_id).await?)
    }

    fn posting_for(
        &self,
        account: &Account,
        validated: &ValidatedTransaction,
    ) -> Result<Posting, LedgerError> {
        let new_balance = account.settle(validated.kind, validated.amount)?;

        Ok(Posting {
            transaction: PendingTransaction {
                id: Uuid::now_v7(),
                account_id: *account.id(),
                value: validated.amount.get(),
                kind: validated.kind,
                description: validated.description.as_str().to_string(),
                created_at: Utc::now(),
            },
            expected_balance: account.balance(),
            new_balance,
        })
    }

    /// Current limit and balance plus the `max_count` most recent
    /// transactions (the configured statement size when `None`).
    pub async fn get_statement(
        &self,
        account_id: AccountId,
        max_count: Option<usize>,
    ) -> Result<Statement, LedgerError> {
        let size = max_count.unwrap_or(self.settings.statement_size);

        let span = info_span!("get_statement", account_id = %account_id, size);
        async {
            let (account, transactions) = self.store.snapshot(account_id, size).await.map_err(|e| {
                let e = LedgerError::from(e);
                log_failure("statement failed", &e);
                e
            })?;

            Ok(Statement {
                account_id,
                limit: account.limit(),
                balance: account.balance(),
                as_of: Utc::now(),
                transactions,
            })
        }
        .instrument(span)
        .await
    }

    /// Create an account with a zero balance. Bootstrap only.
    pub async fn create_account(&self, id: AccountId, limit: i64) -> Result<Account, LedgerError> {
        Account::open(id, limit)?;
        Ok(self.store.create(id, limit).await?)
    }

    /// Compare the stored balance with a fold of the account's log.
    ///
    /// Holds the account's gate so no commit from this process interleaves.
    pub async fn audit(&self, account_id: AccountId) -> Result<AuditReport, LedgerError> {
        let _permit = self.acquire_existing(account_id).await?;
        let account = self.store.get(account_id).await?;
        let replayed = self.store.replay_balance(account_id).await?;

        let report = AuditReport {
            account_id,
            stored_balance: account.balance(),
            replayed_balance: replayed,
        };
        if !report.is_consistent() {
            error!(
                account_id = %account_id,
                stored = report.stored_balance,
                replayed = report.replayed_balance,
                "stored balance disagrees with transaction log"
            );
        }
        Ok(report)
    }
}

fn log_failure(what: &str, e: &LedgerError) {
    if e.is_expected() {
        debug!(error = %e, "{what}");
    } else {
        error!(error = %e, "{what}");
    }
}
