use super::{decimal_col, opt_time_col, sum_decimals, time_col, LedgerStore};
use crate::{
    error::LedgerResult,
    ledger::{EntryLink, EntryStatus, LedgerEntry, LedgerEntryKind},
    types::{to_millis, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const ENTRY_COLUMNS: &str = "entry_id, account_id, kind, amount, currency, status, method,
     reference, investment_id, edge_id, created_at, resolved_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let investment_id: Option<String> = row.get(8)?;
    let edge_id: Option<String> = row.get(9)?;
    let link = match (investment_id, edge_id) {
        (Some(id), _) => Some(EntryLink::Investment(id)),
        (None, Some(id)) => Some(EntryLink::ReferralEdge(id)),
        (None, None) => None,
    };
    Ok(LedgerEntry {
        entry_id: row.get(0)?,
        account_id: row.get(1)?,
        kind: row.get(2)?,
        amount: decimal_col(row, 3)?,
        currency: row.get(4)?,
        status: row.get(5)?,
        method: row.get(6)?,
        reference: row.get(7)?,
        link,
        created_at: time_col(row, 10)?,
        resolved_at: opt_time_col(row, 11)?,
    })
}

impl LedgerStore {
    // ── Ledger entries ────────────────────────────────────────────

    pub fn insert_entry(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        let (investment_id, edge_id) = match &entry.link {
            Some(EntryLink::Investment(id)) => (Some(id.as_str()), None),
            Some(EntryLink::ReferralEdge(id)) => (None, Some(id.as_str())),
            None => (None, None),
        };
        self.conn.execute(
            "INSERT INTO ledger_entries (
                entry_id, account_id, kind, amount, currency, status, method,
                reference, investment_id, edge_id, created_at, resolved_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.entry_id,
                entry.account_id,
                entry.kind,
                entry.amount.to_string(),
                entry.currency,
                entry.status,
                entry.method,
                entry.reference,
                investment_id,
                edge_id,
                to_millis(entry.created_at),
                entry.resolved_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    pub fn get_entry(&self, entry_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE entry_id = ?1"),
                params![entry_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn entry_by_reference(&self, reference: &str) -> LedgerResult<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reference = ?1"),
                params![reference],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Move a pending entry to a terminal status.
    /// Returns 0 when the entry was already terminal.
    pub fn resolve_entry(
        &self,
        entry_id: &str,
        status: EntryStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE ledger_entries SET status = ?1, resolved_at = ?2
             WHERE entry_id = ?3 AND status = 'pending'",
            params![status, to_millis(at), entry_id],
        )?;
        Ok(changed)
    }

    pub fn entries_for_account(
        &self,
        account_id: &str,
        kind: Option<LedgerEntryKind>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE account_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![account_id, kind], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn completed_total(&self, account_id: &str, kind: LedgerEntryKind) -> LedgerResult<Money> {
        let mut stmt = self.conn.prepare(
            "SELECT amount FROM ledger_entries
             WHERE account_id = ?1 AND kind = ?2 AND status = 'completed'",
        )?;
        let amounts = stmt
            .query_map(params![account_id, kind], |row| decimal_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        sum_decimals(amounts)
    }

    pub fn entry_count(&self, account_id: &str, kind: LedgerEntryKind) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE account_id = ?1 AND kind = ?2",
            params![account_id, kind],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
