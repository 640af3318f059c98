use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{checked_amount, CreditLedger, CreditTransaction, TransactionKind};
use crate::error::LedgerError;

#[derive(Default)]
struct Accounts {
    balances: HashMap<String, u64>,
    history: Vec<CreditTransaction>,
}

impl Accounts {
    fn apply(&mut self, owner_id: &str, amount: i64, kind: TransactionKind, reason: &str) -> u64 {
        let balance = self.balances.entry(owner_id.to_string()).or_insert(0);
        *balance = if amount < 0 {
            balance.saturating_sub(amount.unsigned_abs())
        } else {
            balance.saturating_add(amount.unsigned_abs())
        };
        let balance_after = *balance;
        self.history.push(CreditTransaction {
            owner_id: owner_id.to_string(),
            amount,
            kind,
            reason: reason.to_string(),
            balance_after: i64::try_from(balance_after).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        });
        balance_after
    }
}

/// Process-local ledger. Balances are lost when the process exits.
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: Mutex<Accounts>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`InMemoryLedger::grant`].
    pub fn with_balance(self, owner_id: &str, amount: u64) -> Self {
        self.grant(owner_id, amount);
        self
    }

    /// Adds credits outside of any job, e.g. after a purchase.
    pub fn grant(&self, owner_id: &str, amount: u64) -> u64 {
        let amount = i64::try_from(amount).unwrap_or(i64::MAX);
        self.lock().apply(owner_id, amount, TransactionKind::Grant, "grant")
    }

    /// Transactions of one owner, oldest first.
    pub fn history(&self, owner_id: &str) -> Vec<CreditTransaction> {
        self.lock()
            .history
            .iter()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Accounts> {
        match self.accounts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Credit ledger lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError> {
        Ok(self.lock().balances.get(owner_id).copied().unwrap_or(0))
    }

    async fn debit(&self, owner_id: &str, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let signed = checked_amount(amount)?;
        let mut accounts = self.lock();
        let available = accounts.balances.get(owner_id).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::Insufficient {
                required: amount,
                available,
            });
        }
        Ok(accounts.apply(owner_id, -signed, TransactionKind::Debit, reason))
    }

    async fn refund(
        &self,
        owner_id: &str,
        amount: u64,
        reason: &str,
    ) -> Result<u64, LedgerError> {
        let signed = checked_amount(amount)?;
        Ok(self
            .lock()
            .apply(owner_id, signed, TransactionKind::Refund, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_owner_has_zero() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.balance("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_debit_and_refund() {
        let ledger = InMemoryLedger::new().with_balance("u1", 10);
        assert_eq!(ledger.debit("u1", 6, "job").await.unwrap(), 4);
        assert_eq!(ledger.refund("u1", 6, "cancelled").await.unwrap(), 10);

        let history = ledger.history("u1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].amount, -6);
        assert_eq!(history[1].balance_after, 4);
        assert_eq!(history[2].kind, TransactionKind::Refund);
    }

    #[tokio::test]
    async fn test_insufficient_debit_keeps_balance() {
        let ledger = InMemoryLedger::new().with_balance("u1", 1);
        let err = ledger.debit("u1", 10, "job").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Insufficient {
                required: 10,
                available: 1
            }
        ));
        assert_eq!(ledger.balance("u1").await.unwrap(), 1);
        assert_eq!(ledger.history("u1").len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = InMemoryLedger::new().with_balance("u1", 5);
        assert!(matches!(
            ledger.debit("u1", 0, "job").await,
            Err(LedgerError::InvalidAmount(0))
        ));
    }
}
