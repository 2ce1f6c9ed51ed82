use super::{decimal_col, opt_decimal_col, opt_time_col, sum_decimals, time_col, LedgerStore};
use crate::{
    error::LedgerResult,
    investment::{Investment, InvestmentStatus},
    types::{to_millis, EntityId, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const INVESTMENT_COLUMNS: &str = "investment_id, account_id, plan_id, amount, return_multiplier,
     status, start_at, end_at, profit, completed_at";

fn investment_from_row(row: &Row<'_>) -> rusqlite::Result<Investment> {
    Ok(Investment {
        investment_id: row.get(0)?,
        account_id: row.get(1)?,
        plan_id: row.get(2)?,
        amount: decimal_col(row, 3)?,
        return_multiplier: decimal_col(row, 4)?,
        status: row.get(5)?,
        start_at: time_col(row, 6)?,
        end_at: time_col(row, 7)?,
        profit: opt_decimal_col(row, 8)?,
        completed_at: opt_time_col(row, 9)?,
    })
}

impl LedgerStore {
    // ── Investments ───────────────────────────────────────────────

    pub fn insert_investment(&self, inv: &Investment) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO investments (
                investment_id, account_id, plan_id, amount, return_multiplier,
                status, start_at, end_at, profit, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                inv.investment_id,
                inv.account_id,
                inv.plan_id,
                inv.amount.to_string(),
                inv.return_multiplier.to_string(),
                inv.status,
                to_millis(inv.start_at),
                to_millis(inv.end_at),
                inv.profit.map(|p| p.to_string()),
                inv.completed_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    pub fn get_investment(&self, investment_id: &str) -> LedgerResult<Option<Investment>> {
        let inv = self
            .conn
            .query_row(
                &format!("SELECT {INVESTMENT_COLUMNS} FROM investments WHERE investment_id = ?1"),
                params![investment_id],
                investment_from_row,
            )
            .optional()?;
        Ok(inv)
    }

    pub fn investments_for_account(&self, account_id: &str) -> LedgerResult<Vec<Investment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVESTMENT_COLUMNS} FROM investments
             WHERE account_id = ?1
             ORDER BY start_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![account_id], investment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Active investments whose term has ended, oldest first.
    pub fn due_investment_ids(&self, now: DateTime<Utc>) -> LedgerResult<Vec<EntityId>> {
        let mut stmt = self.conn.prepare(
            "SELECT investment_id FROM investments
             WHERE status = 'active' AND end_at <= ?1
             ORDER BY end_at ASC, investment_id ASC",
        )?;
        let rows = stmt
            .query_map(params![to_millis(now)], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flip active → completed and record profit.
    /// Returns 0 if the investment was no longer active.
    pub fn complete_investment(
        &self,
        investment_id: &str,
        profit: Money,
        at: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE investments SET status = ?1, profit = ?2, completed_at = ?3
             WHERE investment_id = ?4 AND status = 'active'",
            params![
                InvestmentStatus::Completed,
                profit.to_string(),
                to_millis(at),
                investment_id
            ],
        )?;
        Ok(changed)
    }

    pub fn invested_total(&self, account_id: &str) -> LedgerResult<Money> {
        let mut stmt = self
            .conn
            .prepare("SELECT amount FROM investments WHERE account_id = ?1")?;
        let amounts = stmt
            .query_map(params![account_id], |row| decimal_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        sum_decimals(amounts)
    }

    pub fn realized_profit_total(&self, account_id: &str) -> LedgerResult<Money> {
        let mut stmt = self.conn.prepare(
            "SELECT profit FROM investments
             WHERE account_id = ?1 AND status = 'completed' AND profit IS NOT NULL",
        )?;
        let amounts = stmt
            .query_map(params![account_id], |row| decimal_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        sum_decimals(amounts)
    }

    pub fn investment_count(&self, status: InvestmentStatus) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM investments WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
