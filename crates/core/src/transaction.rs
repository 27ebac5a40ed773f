use core::cmp::Ordering;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;
use crate::value_object::ValueObject;

/// Longest description accepted, counted in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 10;

/// Direction of a transaction.
///
/// The wire codes are the single letters used by the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    #[serde(rename = "c")]
    Credit,
    #[serde(rename = "d")]
    Debit,
}

impl TransactionKind {
    /// `+1` for credit, `-1` for debit.
    pub const fn sign(self) -> i64 {
        match self {
            TransactionKind::Credit => 1,
            TransactionKind::Debit => -1,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            TransactionKind::Credit => "c",
            TransactionKind::Debit => "d",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" | "credit" => Ok(TransactionKind::Credit),
            "d" | "debit" => Ok(TransactionKind::Debit),
            other => Err(DomainError::validation(format!(
                "kind must be one of: c, d (got {other:?})"
            ))),
        }
    }
}

/// Strictly positive amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> DomainResult<Self> {
        if value <= 0 {
            return Err(DomainError::validation("value must be a positive integer"));
        }
        Ok(Self(value))
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// Signed contribution of this amount to a balance.
    pub const fn signed(self, kind: TransactionKind) -> i64 {
        self.0 * kind.sign()
    }
}

impl ValueObject for Amount {}

/// Free-text memo attached to a transaction (1..=10 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Description(String);

impl Description {
    pub fn new(text: impl Into<String>) -> DomainResult<Self> {
        let text = text.into();
        let chars = text.chars().count();
        if chars == 0 || chars > DESCRIPTION_MAX_CHARS {
            return Err(DomainError::validation(format!(
                "description must have between 1 and {DESCRIPTION_MAX_CHARS} characters (got {chars})"
            )));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Description {}

/// Caller-supplied transaction, not yet validated.
///
/// The transport layer only guarantees the shape; the contract on each field
/// is checked by [`TransactionRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub value: i64,
    pub kind: TransactionKind,
    pub description: String,
}

impl TransactionRequest {
    pub fn new(value: i64, kind: TransactionKind, description: impl Into<String>) -> Self {
        Self {
            value,
            kind,
            description: description.into(),
        }
    }

    pub fn credit(value: i64, description: impl Into<String>) -> Self {
        Self::new(value, TransactionKind::Credit, description)
    }

    pub fn debit(value: i64, description: impl Into<String>) -> Self {
        Self::new(value, TransactionKind::Debit, description)
    }

    pub fn validate(&self) -> DomainResult<ValidatedTransaction> {
        Ok(ValidatedTransaction {
            amount: Amount::new(self.value)?,
            kind: self.kind,
            description: Description::new(self.description.clone())?,
        })
    }
}

/// A request whose fields satisfy the domain contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    pub amount: Amount,
    pub kind: TransactionKind,
    pub description: Description,
}

/// Committed, immutable transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: AccountId,
    /// Store-assigned position, strictly increasing across the whole log.
    pub sequence: u64,
    pub value: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn signed_value(&self) -> i64 {
        self.value * self.kind.sign()
    }

    /// Statement ordering: most recent first, ties broken by the newest insert.
    pub fn recency_cmp(a: &Transaction, b: &Transaction) -> Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    }
}

impl Entity for Transaction {
    type Id = Uuid;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn committed(sequence: u64, secs: i64) -> Transaction {
        Transaction {
            id: Uuid::now_v7(),
            account_id: AccountId::new(1),
            sequence,
            value: 10,
            kind: TransactionKind::Credit,
            description: "x".to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn amount_must_be_positive() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(Amount::new(0), Err(DomainError::Validation(_))));
        assert!(matches!(Amount::new(-5), Err(DomainError::Validation(_))));
    }

    #[test]
    fn description_bounds_are_counted_in_characters() {
        assert!(Description::new("a").is_ok());
        assert!(Description::new("0123456789").is_ok());
        assert!(Description::new("ação pagar").is_ok());
        assert!(matches!(Description::new(""), Err(DomainError::Validation(_))));
        assert!(matches!(
            Description::new("01234567890"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn kind_parses_codes_and_names() {
        assert_eq!("c".parse::<TransactionKind>().unwrap(), TransactionKind::Credit);
        assert_eq!("debit".parse::<TransactionKind>().unwrap(), TransactionKind::Debit);
        assert!("x".parse::<TransactionKind>().is_err());
        assert!("C".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn kind_serializes_as_wire_code() {
        let json = serde_json::to_string(&TransactionKind::Debit).unwrap();
        assert_eq!(json, "\"d\"");
        let back: TransactionKind = serde_json::from_str("\"c\"").unwrap();
        assert_eq!(back, TransactionKind::Credit);
    }

    #[test]
    fn validate_reports_first_broken_field() {
        let err = TransactionRequest::debit(0, "").validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("value")));

        let err = TransactionRequest::debit(10, "").validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("description")));
    }

    #[test]
    fn recency_orders_by_time_then_sequence() {
        let mut items = vec![committed(1, 100), committed(3, 100), committed(2, 200)];
        items.sort_by(Transaction::recency_cmp);
        let order: Vec<u64> = items.iter().map(|t| t.sequence).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }
}
