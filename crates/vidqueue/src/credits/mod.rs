//! Credit ledger used for admission control.
//!
//! The queue only needs three operations from a ledger: read a balance,
//! debit an amount if the balance covers it, and refund a reservation.
//! Two implementations ship with the crate: [`InMemoryLedger`] for tests and
//! single-process use, and [`SqliteLedger`] on top of the crate database.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

/// Account balance store consulted before and during dispatch.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. Unknown owners have zero credits.
    async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError>;

    /// Removes `amount` credits if the balance covers it and returns the new
    /// balance. Fails with [`LedgerError::Insufficient`] otherwise, leaving
    /// the balance untouched.
    async fn debit(&self, owner_id: &str, amount: u64, reason: &str) -> Result<u64, LedgerError>;

    /// Returns credits to an account and reports the new balance.
    async fn refund(&self, owner_id: &str, amount: u64, reason: &str)
        -> Result<u64, LedgerError>;
}

/// Kind of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Grant,
    Debit,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Debit => "debit",
            Self::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grant" => Some(Self::Grant),
            "debit" => Some(Self::Debit),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// One entry of an account's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub owner_id: String,
    /// Signed change: negative for debits.
    pub amount: i64,
    pub kind: TransactionKind,
    pub reason: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Amounts are stored as signed SQLite integers.
fn checked_amount(amount: u64) -> Result<i64, LedgerError> {
    match i64::try_from(amount) {
        Ok(a) if a > 0 => Ok(a),
        _ => Err(LedgerError::InvalidAmount(amount)),
    }
}
