//! Wire shapes of the public API and their mapping from ledger views.
//!
//! Field names follow the public contract (Portuguese), not the domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use saldo_core::{BalanceView, Statement, Transaction, TransactionKind, TransactionRequest};

/// `POST /clientes/:id/transacoes` body.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPayload {
    pub valor: i64,
    pub tipo: TransactionKind,
    pub descricao: String,
}

impl From<TransactionPayload> for TransactionRequest {
    fn from(p: TransactionPayload) -> Self {
        TransactionRequest::new(p.valor, p.tipo, p.descricao)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub limite: i64,
    pub saldo: i64,
}

impl From<BalanceView> for BalanceResponse {
    fn from(v: BalanceView) -> Self {
        Self {
            limite: v.limit,
            saldo: v.balance,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementBalance {
    pub total: i64,
    pub data_extrato: DateTime<Utc>,
    pub limite: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementEntry {
    pub valor: i64,
    pub tipo: TransactionKind,
    pub descricao: String,
    pub realizada_em: DateTime<Utc>,
}

impl From<Transaction> for StatementEntry {
    fn from(t: Transaction) -> Self {
        Self {
            valor: t.value,
            tipo: t.kind,
            descricao: t.description,
            realizada_em: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementResponse {
    pub saldo: StatementBalance,
    pub ultimas_transacoes: Vec<StatementEntry>,
}

impl From<Statement> for StatementResponse {
    fn from(s: Statement) -> Self {
        Self {
            saldo: StatementBalance {
                total: s.balance,
                data_extrato: s.as_of,
                limite: s.limit,
            },
            ultimas_transacoes: s.transactions.into_iter().map(StatementEntry::from).collect(),
        }
    }
}
