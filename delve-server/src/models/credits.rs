//! Credit ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Consume,
    Bonus,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Consume => "consume",
            TransactionType::Bonus => "bonus",
            TransactionType::Refund => "refund",
        }
    }
}

impl FromStr for TransactionType {
    type Err = delve_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionType::Purchase),
            "consume" => Ok(TransactionType::Consume),
            "bonus" => Ok(TransactionType::Bonus),
            "refund" => Ok(TransactionType::Refund),
            other => Err(delve_common::Error::InvalidInput(format!(
                "Unknown transaction type: {}",
                other
            ))),
        }
    }
}

/// Who caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uuid),
    /// Scheduled grants and other service-initiated changes
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "{}", id),
            Actor::System => f.write_str("system"),
        }
    }
}

/// Immutable ledger entry
///
/// `balance` is the organization's balance right after this entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: Uuid,
    pub org_id: Uuid,
    /// User id, or `system`
    pub user_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Signed: negative for consumption
    pub amount: i64,
    pub balance: i64,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
