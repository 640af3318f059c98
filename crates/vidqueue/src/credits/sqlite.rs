use async_trait::async_trait;

use super::{checked_amount, CreditLedger, CreditTransaction, TransactionKind};
use crate::db::credit_repo::{self, DebitOutcome};
use crate::db::{Database, DatabaseError};
use crate::error::LedgerError;

/// Ledger persisted in the `credit_accounts` and `credit_transactions` tables.
#[derive(Clone)]
pub struct SqliteLedger {
    db: Database,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl SqliteLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds credits outside of any job.
    pub async fn grant(&self, owner_id: &str, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let amount = checked_amount(amount)?;
        let reason = reason.to_string();
        self.blocking(owner_id, move |db, owner| {
            credit_repo::credit(db, owner, amount, TransactionKind::Grant, &reason)
        })
        .await
        .map(to_u64)
    }

    /// Most recent transactions first.
    pub async fn history(
        &self,
        owner_id: &str,
        limit: u32,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        self.blocking(owner_id, move |db, owner| credit_repo::history(db, owner, limit))
            .await
    }

    /// Runs a repository call on the blocking pool.
    async fn blocking<T, F>(&self, owner_id: &str, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, &str) -> Result<T, DatabaseError> + Send + 'static,
    {
        let db = self.db.clone();
        let owner = owner_id.to_string();
        tokio::task::spawn_blocking(move || f(&db, &owner))
            .await
            .map_err(|e| LedgerError::Backend(format!("ledger task failed: {}", e)))?
            .map_err(LedgerError::from)
    }
}

#[async_trait]
impl CreditLedger for SqliteLedger {
    async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError> {
        self.blocking(owner_id, credit_repo::balance).await.map(to_u64)
    }

    async fn debit(&self, owner_id: &str, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let signed = checked_amount(amount)?;
        let reason = reason.to_string();
        let outcome = self
            .blocking(owner_id, move |db, owner| {
                credit_repo::debit(db, owner, signed, &reason)
            })
            .await?;

        match outcome {
            DebitOutcome::Debited { balance } => Ok(to_u64(balance)),
            DebitOutcome::Insufficient { available } => Err(LedgerError::Insufficient {
                required: amount,
                available: to_u64(available),
            }),
        }
    }

    async fn refund(
        &self,
        owner_id: &str,
        amount: u64,
        reason: &str,
    ) -> Result<u64, LedgerError> {
        let signed = checked_amount(amount)?;
        let reason = reason.to_string();
        self.blocking(owner_id, move |db, owner| {
            credit_repo::credit(db, owner, signed, TransactionKind::Refund, &reason)
        })
        .await
        .map(to_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_debit_refund() {
        let ledger = SqliteLedger::new(Database::open_in_memory().unwrap());
        assert_eq!(ledger.grant("u1", 10, "signup").await.unwrap(), 10);
        assert_eq!(ledger.debit("u1", 6, "job").await.unwrap(), 4);
        assert_eq!(ledger.balance("u1").await.unwrap(), 4);
        assert_eq!(ledger.refund("u1", 6, "cancelled").await.unwrap(), 10);

        let history = ledger.history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, TransactionKind::Refund);
    }

    #[tokio::test]
    async fn test_insufficient_debit() {
        let ledger = SqliteLedger::new(Database::open_in_memory().unwrap());
        ledger.grant("u1", 1, "signup").await.unwrap();

        let err = ledger.debit("u1", 10, "job").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Insufficient {
                required: 10,
                available: 1
            }
        ));
        assert_eq!(ledger.balance("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overspend() {
        let ledger = SqliteLedger::new(Database::open_in_memory().unwrap());
        ledger.grant("u1", 10, "signup").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.debit("u1", 4, "job").await }));
        }
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 2);
        assert_eq!(ledger.balance("u1").await.unwrap(), 2);
    }
}
