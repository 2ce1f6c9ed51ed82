use super::{time_col, LedgerStore};
use crate::{error::LedgerResult, event::EventLogEntry, types::to_millis};
use rusqlite::params;

impl LedgerStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (account_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.account_id,
                entry.event_type,
                entry.payload,
                to_millis(entry.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, event_type, payload, created_at
             FROM event_log WHERE account_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![account_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    account_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: time_col(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
