//! Durable escrow ledger backed by `SQLite`.
//!
//! # Schema
//!
//! The `ledger_entries` table has columns: `seq` (append order), `entry_id`,
//! `bounty_id`, `kind`, `amount_nanoton`, `from_account`, `to_account`,
//! `recorded_at`, `settlement_hash`.
//!
//! Rows are never updated or deleted except for the single sanctioned
//! update of `settlement_hash` from NULL to a reported hash. Balances are
//! derived by folding rows, never stored; the disbursement guard runs the
//! fold and the insert inside one transaction under the connection mutex,
//! so a release racing a refund for the same bounty cannot both pass the
//! balance check.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use adbounty_core::error::{CoordinatorError, Result};
use adbounty_core::escrow::{EntryKind, EscrowLedger, LedgerEntry};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_entries (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id        TEXT NOT NULL UNIQUE,
    bounty_id       TEXT NOT NULL,
    kind            TEXT NOT NULL,
    amount_nanoton  INTEGER NOT NULL,
    from_account    INTEGER,
    to_account      INTEGER,
    recorded_at     TEXT NOT NULL,
    settlement_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_bounty
    ON ledger_entries(bounty_id);
";

const BALANCE_SQL: &str = "
SELECT COALESCE(SUM(CASE kind
    WHEN 'hold' THEN amount_nanoton
    WHEN 'release' THEN -amount_nanoton
    WHEN 'refund' THEN -amount_nanoton
    ELSE 0 END), 0)
FROM ledger_entries WHERE bounty_id = ?1
";

const INSERT_SQL: &str = "
INSERT INTO ledger_entries
    (entry_id, bounty_id, kind, amount_nanoton, from_account, to_account,
     recorded_at, settlement_hash)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

const SELECT_COLUMNS: &str = "
SELECT entry_id, bounty_id, kind, amount_nanoton, from_account, to_account,
       recorded_at, settlement_hash
FROM ledger_entries
";

/// Durable [`EscrowLedger`] implementation.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Opens (and migrates) the ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] when the database cannot be
    /// opened or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory ledger, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Storage`] when the schema cannot be
    /// applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CoordinatorError::Storage {
            reason: "ledger connection mutex poisoned".to_string(),
        })
    }

    fn insert_entry(tx: &rusqlite::Transaction<'_>, entry: &LedgerEntry) -> Result<()> {
        let amount = i64::try_from(entry.amount_nanoton).map_err(|_| CoordinatorError::Storage {
            reason: format!("amount {} exceeds the storable range", entry.amount_nanoton),
        })?;
        tx.execute(
            INSERT_SQL,
            params![
                entry.entry_id,
                entry.bounty_id,
                entry.kind.to_string(),
                amount,
                entry.from_account,
                entry.to_account,
                entry.recorded_at.to_rfc3339(),
                entry.settlement_hash,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn balance_in_tx(tx: &rusqlite::Transaction<'_>, bounty_id: &str) -> Result<u64> {
        let raw: i64 = tx
            .query_row(BALANCE_SQL, params![bounty_id], |row| row.get(0))
            .map_err(storage_err)?;
        u64::try_from(raw).map_err(|_| CoordinatorError::Storage {
            reason: format!("negative folded balance {raw} for bounty {bounty_id}"),
        })
    }

    fn guarded_disburse(
        &self,
        bounty_id: &str,
        kind: EntryKind,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let balance = Self::balance_in_tx(&tx, bounty_id)?;
        if amount_nanoton > balance {
            return Err(CoordinatorError::OverRelease {
                bounty_id: bounty_id.to_string(),
                balance,
                requested: amount_nanoton,
            });
        }

        let entry = new_entry(bounty_id, kind, amount_nanoton, None, Some(to_account), None);
        Self::insert_entry(&tx, &entry)?;
        tx.commit().map_err(storage_err)?;
        Ok(entry)
    }

    fn query_entries(
        &self,
        where_clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} WHERE {where_clause} ORDER BY seq");
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let bound: &[&dyn rusqlite::ToSql] = &[param];
        let rows = stmt.query_map(bound, row_to_entry).map_err(storage_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(storage_err)??);
        }
        Ok(entries)
    }
}

impl EscrowLedger for SqliteLedger {
    fn fund(
        &self,
        bounty_id: &str,
        amount_nanoton: u64,
        advertiser_id: i64,
        settlement_hash: &str,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let deposit = new_entry(
            bounty_id,
            EntryKind::Deposit,
            amount_nanoton,
            Some(advertiser_id),
            None,
            Some(settlement_hash.to_string()),
        );
        let hold = new_entry(
            bounty_id,
            EntryKind::Hold,
            amount_nanoton,
            Some(advertiser_id),
            None,
            None,
        );
        Self::insert_entry(&tx, &deposit)?;
        Self::insert_entry(&tx, &hold)?;
        tx.commit().map_err(storage_err)?;
        Ok((deposit, hold))
    }

    fn release(
        &self,
        bounty_id: &str,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        self.guarded_disburse(bounty_id, EntryKind::Release, to_account, amount_nanoton)
    }

    fn refund(
        &self,
        bounty_id: &str,
        to_account: i64,
        amount_nanoton: u64,
    ) -> Result<LedgerEntry> {
        self.guarded_disburse(bounty_id, EntryKind::Refund, to_account, amount_nanoton)
    }

    fn balance(&self, bounty_id: &str) -> Result<u64> {
        let conn = self.lock()?;
        let raw: i64 = conn
            .query_row(BALANCE_SQL, params![bounty_id], |row| row.get(0))
            .map_err(storage_err)?;
        u64::try_from(raw).map_err(|_| CoordinatorError::Storage {
            reason: format!("negative folded balance {raw} for bounty {bounty_id}"),
        })
    }

    fn entries_for_bounty(&self, bounty_id: &str) -> Result<Vec<LedgerEntry>> {
        self.query_entries("bounty_id = ?1", &bounty_id.to_string())
    }

    fn history_for_account(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        self.query_entries("?1 IN (from_account, to_account)", &account_id)
    }

    fn attach_settlement(&self, entry_id: &str, settlement_hash: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE ledger_entries SET settlement_hash = ?2
                 WHERE entry_id = ?1 AND settlement_hash IS NULL",
                params![entry_id, settlement_hash],
            )
            .map_err(storage_err)?;
        if updated == 1 {
            return Ok(());
        }
        // Zero rows: either the entry is unknown or the hash is already
        // attached (idempotent re-report).
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM ledger_entries WHERE entry_id = ?1",
                params![entry_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if exists.is_some() {
            Ok(())
        } else {
            Err(CoordinatorError::Storage {
                reason: format!("ledger entry {entry_id} not found"),
            })
        }
    }
}

fn new_entry(
    bounty_id: &str,
    kind: EntryKind,
    amount_nanoton: u64,
    from_account: Option<i64>,
    to_account: Option<i64>,
    settlement_hash: Option<String>,
) -> LedgerEntry {
    LedgerEntry {
        entry_id: format!("entry-{}", Uuid::new_v4()),
        bounty_id: bounty_id.to_string(),
        kind,
        amount_nanoton,
        from_account,
        to_account,
        recorded_at: Utc::now(),
        settlement_hash,
    }
}

fn storage_err(err: rusqlite::Error) -> CoordinatorError {
    CoordinatorError::Storage {
        reason: err.to_string(),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LedgerEntry>> {
    let entry_id: String = row.get(0)?;
    let bounty_id: String = row.get(1)?;
    let kind_text: String = row.get(2)?;
    let amount: i64 = row.get(3)?;
    let from_account: Option<i64> = row.get(4)?;
    let to_account: Option<i64> = row.get(5)?;
    let recorded_at_text: String = row.get(6)?;
    let settlement_hash: Option<String> = row.get(7)?;

    // Storage-level reads succeeded; decoding failures surface as typed
    // storage errors rather than rusqlite ones.
    Ok((|| {
        let kind = EntryKind::parse(&kind_text)?;
        let amount_nanoton = u64::try_from(amount).map_err(|_| CoordinatorError::Storage {
            reason: format!("negative stored amount {amount}"),
        })?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at_text)
            .map_err(|err| CoordinatorError::Storage {
                reason: format!("unparseable recorded_at '{recorded_at_text}': {err}"),
            })?
            .with_timezone(&Utc);
        Ok(LedgerEntry {
            entry_id,
            bounty_id,
            kind,
            amount_nanoton,
            from_account,
            to_account,
            recorded_at,
            settlement_hash,
        })
    })())
}
