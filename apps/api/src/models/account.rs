use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A metered account. Identity lives elsewhere; this is only the token side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    /// May go negative through soft overdraft.
    pub token_balance: i64,
    /// First-purchase price freeze, keyed by package id. Entries never change once set.
    pub locked_package_prices: HashMap<String, i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Debit,
    Credit,
    AdminAdjustment,
    Grant,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Debit => "debit",
            TransactionKind::Credit => "credit",
            TransactionKind::AdminAdjustment => "admin_adjustment",
            TransactionKind::Grant => "grant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debit" => Some(TransactionKind::Debit),
            "credit" => Some(TransactionKind::Credit),
            "admin_adjustment" => Some(TransactionKind::AdminAdjustment),
            "grant" => Some(TransactionKind::Grant),
            _ => None,
        }
    }
}

/// Append-only record of a single balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Signed: debits are negative.
    pub amount: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_kind_round_trips_through_str() {
        for kind in [
            TransactionKind::Debit,
            TransactionKind::Credit,
            TransactionKind::AdminAdjustment,
            TransactionKind::Grant,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("refund"), None);
    }

    #[test]
    fn test_transaction_kind_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionKind::AdminAdjustment).unwrap();
        assert_eq!(json, "\"admin_adjustment\"");
    }
}
