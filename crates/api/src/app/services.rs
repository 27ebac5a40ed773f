use std::sync::Arc;

use anyhow::Context;

use saldo_core::{AccountId, BalanceView, Statement, TransactionRequest};
use saldo_infra::config::{EngineSettings, LedgerConfig, StorageBackend};
use saldo_infra::engine::{LedgerEngine, LedgerError};
use saldo_infra::seed::{REFERENCE_ACCOUNTS, seed_accounts};
use saldo_infra::store::{InMemoryLedgerStore, PostgresLedgerStore};

type InMemoryEngine = LedgerEngine<Arc<InMemoryLedgerStore>>;
type PersistentEngine = LedgerEngine<Arc<PostgresLedgerStore>>;

/// The engine behind the HTTP handlers, one variant per storage backend.
#[derive(Clone)]
pub enum AppServices {
    InMemory { engine: Arc<InMemoryEngine> },
    Persistent { engine: Arc<PersistentEngine> },
}

impl AppServices {
    pub fn in_memory(settings: EngineSettings) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        AppServices::InMemory {
            engine: Arc::new(LedgerEngine::new(store, settings)),
        }
    }

    pub fn persistent(store: PostgresLedgerStore, settings: EngineSettings) -> Self {
        AppServices::Persistent {
            engine: Arc::new(LedgerEngine::new(Arc::new(store), settings)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "memory",
            AppServices::Persistent { .. } => "postgres",
        }
    }

    pub async fn apply_transaction(
        &self,
        account_id: AccountId,
        request: TransactionRequest,
    ) -> Result<BalanceView, LedgerError> {
        match self {
            AppServices::InMemory { engine } => engine.apply_transaction(account_id, request).await,
            AppServices::Persistent { engine } => engine.apply_transaction(account_id, request).await,
        }
    }

    pub async fn get_statement(&self, account_id: AccountId) -> Result<Statement, LedgerError> {
        match self {
            AppServices::InMemory { engine } => engine.get_statement(account_id, None).await,
            AppServices::Persistent { engine } => engine.get_statement(account_id, None).await,
        }
    }

    /// Create any missing reference account.
    pub async fn seed(&self) -> anyhow::Result<usize> {
        let created = match self {
            AppServices::InMemory { engine } => {
                seed_accounts(engine.store(), &REFERENCE_ACCOUNTS).await
            }
            AppServices::Persistent { engine } => {
                seed_accounts(engine.store(), &REFERENCE_ACCOUNTS).await
            }
        };
        created.context("failed to seed reference accounts")
    }
}

/// Build the services selected by `config` (connect, migrate, seed).
pub async fn build_services(config: &LedgerConfig) -> anyhow::Result<AppServices> {
    let services = match &config.backend {
        StorageBackend::InMemory => AppServices::in_memory(config.engine),
        StorageBackend::Postgres(pg) => {
            let store = PostgresLedgerStore::connect(pg)
                .await
                .with_context(|| format!("failed to connect to postgres at {}:{}", pg.host, pg.port))?;
            store.migrate().await.context("failed to apply ledger schema")?;
            AppServices::persistent(store, config.engine)
        }
    };

    if config.seed {
        services.seed().await?;
    }

    tracing::info!(backend = services.backend_name(), seed = config.seed, "ledger services ready");
    Ok(services)
}
