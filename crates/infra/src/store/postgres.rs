//! Postgres-backed ledger store implementation.
//!
//! Accounts keep a denormalized `balance` next to their `limit_value`; the
//! `transactions` table is append-only. Both are written in one SQL
//! transaction that first locks the account row (`SELECT ... FOR UPDATE`), so
//! several service processes may share the same database safely.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `AccountExists` | `create` on an existing id |
//! | Database (check violation) | `23514` | `Backend` | A write would break a schema invariant |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / PoolTimedOut | N/A | `Backend` | Pool shut down or exhausted |
//! | Other | N/A | `Backend` | Network errors, decode failures, etc. |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use saldo_core::{Account, AccountId, Transaction, TransactionKind};

use super::r#trait::{AccountStore, Appended, LedgerStore, Posting, StoreError, TransactionLog};
use crate::config::PostgresSettings;

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

/// Postgres-backed ledger store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clones share the pool.
///
/// ## Consistency
///
/// - `append` locks the account row, compares the stored balance against
///   `expected_balance`, inserts the transaction and updates the balance,
///   then commits. Any failure rolls the whole unit back.
/// - `snapshot` reads the account and its recent transactions inside one
///   `REPEATABLE READ` transaction, so both come from the same commit.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    /// Create a new PostgresLedgerStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from settings.
    pub async fn connect(settings: &PostgresSettings) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.user)
            .password(&settings.password);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Open a pool from a `postgres://` URL.
    pub async fn connect_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(account_id = %id), err(level = "debug"))]
    async fn create(&self, id: AccountId, limit: i64) -> Result<Account, StoreError> {
        let account = Account::open(id, limit).map_err(|e| StoreError::backend(e.to_string()))?;

        sqlx::query("INSERT INTO accounts (id, limit_value, balance) VALUES ($1, $2, 0)")
            .bind(id.get())
            .bind(limit)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AccountExists(id)
                } else {
                    map_sqlx_error("create_account", e)
                }
            })?;

        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err(level = "debug"))]
    async fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = sqlx::query("SELECT id, limit_value, balance FROM accounts WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(StoreError::AccountNotFound(id)),
        }
    }

    async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT id, limit_value, balance FROM accounts ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_all_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    async fn exists(&self, id: AccountId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
            .bind(id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_exists", e))?;
        Ok(exists)
    }
}

#[async_trait]
impl TransactionLog for PostgresLedgerStore {
    #[instrument(skip(self), fields(account_id = %account_id), err(level = "debug"))]
    async fn query(
        &self,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
        max_count: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        if !self.exists(account_id).await? {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let rows = sqlx::query(
            r#"
            SELECT sequence, transaction_id, account_id, value, kind::text AS kind, description, created_at
            FROM transactions
            WHERE account_id = $1 AND ($2::timestamptz IS NULL OR created_at <= $2)
            ORDER BY created_at DESC, sequence DESC
            LIMIT $3
            "#,
        )
        .bind(account_id.get())
        .bind(before)
        .bind(limit_param(max_count))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_transactions", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn replay_balance(&self, account_id: AccountId) -> Result<i64, StoreError> {
        if !self.exists(account_id).await? {
            return Err(StoreError::AccountNotFound(account_id));
        }

        let folded: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE kind WHEN 'c' THEN value ELSE -value END), 0)::BIGINT
            FROM transactions
            WHERE account_id = $1
            "#,
        )
        .bind(account_id.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replay_balance", e))?;

        Ok(folded)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, posting),
        fields(
            account_id = %posting.transaction.account_id,
            expected_balance = posting.expected_balance,
            new_balance = posting.new_balance,
            sequence = tracing::field::Empty
        ),
        err(level = "warn")
    )]
    async fn append(&self, posting: Posting) -> Result<Appended, StoreError> {
        let Posting {
            transaction: pending,
            expected_balance,
            new_balance,
        } = posting;
        let account_id = pending.account_id;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row lock: held until commit/rollback.
        let row = sqlx::query("SELECT id, limit_value, balance FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_account", e))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::AccountNotFound(account_id));
        };
        let account = account_from_row(&row)?;

        if account.balance() != expected_balance {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "account {account_id}: expected balance {expected_balance}, found {}",
                account.balance()
            )));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (transaction_id, account_id, value, kind, description, created_at)
            VALUES (
                $1, $2, $3, $4, $5,
                GREATEST(
                    $6::timestamptz,
                    COALESCE((SELECT MAX(created_at) FROM transactions WHERE account_id = $2), $6::timestamptz)
                )
            )
            RETURNING sequence, created_at
            "#,
        )
        .bind(pending.id)
        .bind(account_id.get())
        .bind(pending.value)
        .bind(pending.kind.code())
        .bind(&pending.description)
        .bind(pending.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        let sequence: i64 = inserted
            .try_get("sequence")
            .map_err(|e| map_sqlx_error("read_sequence", e))?;
        let created_at: DateTime<Utc> = inserted
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("read_created_at", e))?;

        sqlx::query("UPDATE accounts SET balance = $2 WHERE id = $1")
            .bind(account_id.get())
            .bind(new_balance)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("sequence", sequence);

        Ok(Appended {
            account: account.with_balance(new_balance),
            transaction: Transaction {
                id: pending.id,
                account_id,
                sequence: sequence as u64,
                value: pending.value,
                kind: pending.kind,
                description: pending.description,
                created_at,
            },
        })
    }

    #[instrument(skip(self), fields(account_id = %account_id), err(level = "debug"))]
    async fn snapshot(
        &self,
        account_id: AccountId,
        max_count: usize,
    ) -> Result<(Account, Vec<Transaction>), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let row = sqlx::query("SELECT id, limit_value, balance FROM accounts WHERE id = $1")
            .bind(account_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot_account", e))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::AccountNotFound(account_id));
        };
        let account = account_from_row(&row)?;

        let rows = sqlx::query(
            r#"
            SELECT sequence, transaction_id, account_id, value, kind::text AS kind, description, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, sequence DESC
            LIMIT $2
            "#,
        )
        .bind(account_id.get())
        .bind(limit_param(max_count))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_transactions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let transactions = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((account, transactions))
    }
}

fn limit_param(max_count: usize) -> i64 {
    i64::try_from(max_count).unwrap_or(i64::MAX)
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let id: i32 = row.try_get("id").map_err(|e| map_sqlx_error("decode_account", e))?;
    let limit: i64 = row
        .try_get("limit_value")
        .map_err(|e| map_sqlx_error("decode_account", e))?;
    let balance: i64 = row
        .try_get("balance")
        .map_err(|e| map_sqlx_error("decode_account", e))?;

    Account::restore(AccountId::new(id), limit, balance)
        .map_err(|e| StoreError::backend(format!("corrupt account row: {e}")))
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let decode = |e| map_sqlx_error("decode_transaction", e);

    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    let kind: String = row.try_get("kind").map_err(decode)?;
    let account_id: i32 = row.try_get("account_id").map_err(decode)?;

    Ok(Transaction {
        id: row.try_get("transaction_id").map_err(decode)?,
        account_id: AccountId::new(account_id),
        sequence: sequence as u64,
        value: row.try_get("value").map_err(decode)?,
        kind: kind
            .trim()
            .parse::<TransactionKind>()
            .map_err(|e| StoreError::backend(format!("corrupt transaction row: {e}")))?,
        description: row.try_get("description").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            StoreError::Backend(format!(
                "database error in {operation} (sqlstate {code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
