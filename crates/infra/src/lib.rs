//! Infrastructure layer: storage backends, per-account gating, the ledger
//! engine, config and bootstrap seeding.

pub mod config;
pub mod engine;
pub mod gate;
pub mod seed;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, EngineSettings, LedgerConfig, PostgresSettings, StorageBackend};
pub use engine::{AuditReport, LedgerEngine, LedgerError};
pub use gate::{AccountGate, AccountPermit, GateError};
pub use seed::{REFERENCE_ACCOUNTS, seed_accounts};
