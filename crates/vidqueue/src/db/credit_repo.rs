//! Credit repository — balances and the append-only transaction log.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::credits::{CreditTransaction, TransactionKind};

/// Outcome of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance: i64 },
    Insufficient { available: i64 },
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn current_balance(conn: &Connection, owner_id: &str) -> Result<i64, DatabaseError> {
    let balance = conn
        .query_row(
            "SELECT balance FROM credit_accounts WHERE owner_id = ?1",
            params![owner_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

fn record(
    conn: &Connection,
    owner_id: &str,
    amount: i64,
    kind: TransactionKind,
    reason: &str,
    balance_after: i64,
    at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO credit_transactions (owner_id, amount, kind, reason, balance_after, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![owner_id, amount, kind.as_str(), reason, balance_after, at],
    )?;
    Ok(())
}

/// Current balance. Unknown owners have a balance of zero.
pub fn balance(db: &Database, owner_id: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| current_balance(conn, owner_id))
}

/// Adds credits to an account, creating it if needed. Returns the new balance.
pub fn credit(
    db: &Database,
    owner_id: &str,
    amount: i64,
    kind: TransactionKind,
    reason: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let at = now();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO credit_accounts (owner_id, balance, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id) DO UPDATE SET balance = balance + excluded.balance,
             updated_at = excluded.updated_at",
            params![owner_id, amount, at],
        )?;
        let balance = current_balance(&tx, owner_id)?;
        record(&tx, owner_id, amount, kind, reason, balance, &at)?;
        tx.commit()?;
        Ok(balance)
    })
}

/// Removes credits only if the balance covers the amount.
///
/// The check and the decrement are one statement, so concurrent debits
/// against the same account cannot overspend.
pub fn debit(
    db: &Database,
    owner_id: &str,
    amount: i64,
    reason: &str,
) -> Result<DebitOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let at = now();
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE credit_accounts SET balance = balance - ?2, updated_at = ?3
             WHERE owner_id = ?1 AND balance >= ?2",
            params![owner_id, amount, at],
        )?;
        if changed == 0 {
            let available = current_balance(&tx, owner_id)?;
            return Ok(DebitOutcome::Insufficient { available });
        }
        let balance = current_balance(&tx, owner_id)?;
        record(&tx, owner_id, -amount, TransactionKind::Debit, reason, balance, &at)?;
        tx.commit()?;
        Ok(DebitOutcome::Debited { balance })
    })
}

fn transaction_from_row(row: &Row<'_>) -> Result<CreditTransaction, rusqlite::Error> {
    let kind: String = row.get("kind")?;
    let created_at: String = row.get("created_at")?;
    Ok(CreditTransaction {
        owner_id: row.get("owner_id")?,
        amount: row.get("amount")?,
        kind: TransactionKind::parse(&kind).unwrap_or(TransactionKind::Grant),
        reason: row.get("reason")?,
        balance_after: row.get("balance_after")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                log::warn!("Bad credit transaction timestamp '{}': {}", created_at, e);
                Utc::now()
            }),
    })
}

/// Most recent transactions first.
pub fn history(
    db: &Database,
    owner_id: &str,
    limit: u32,
) -> Result<Vec<CreditTransaction>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM credit_transactions WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![owner_id, limit], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
