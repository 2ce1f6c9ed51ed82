use super::{decimal_col, LedgerStore};
use crate::{error::LedgerResult, investment::Plan};
use rusqlite::{params, OptionalExtension, Row};

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        plan_id: row.get(0)?,
        name: row.get(1)?,
        return_multiplier: decimal_col(row, 2)?,
        min_deposit: decimal_col(row, 3)?,
        max_deposit: decimal_col(row, 4)?,
        duration_secs: row.get(5)?,
        active: row.get::<_, i32>(6)? != 0,
    })
}

impl LedgerStore {
    // ── Plans (read-only outside of seeding) ──────────────────────

    /// Seed or refresh a plan from configuration.
    pub fn upsert_plan(&self, plan: &Plan) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO plans (
                plan_id, name, return_multiplier, min_deposit, max_deposit, duration_secs, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(plan_id) DO UPDATE SET
                name = excluded.name,
                return_multiplier = excluded.return_multiplier,
                min_deposit = excluded.min_deposit,
                max_deposit = excluded.max_deposit,
                duration_secs = excluded.duration_secs,
                active = excluded.active",
            params![
                plan.plan_id,
                plan.name,
                plan.return_multiplier.to_string(),
                plan.min_deposit.to_string(),
                plan.max_deposit.to_string(),
                plan.duration_secs,
                if plan.active { 1 } else { 0 },
            ],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, plan_id: &str) -> LedgerResult<Option<Plan>> {
        let plan = self
            .conn
            .query_row(
                "SELECT plan_id, name, return_multiplier, min_deposit, max_deposit,
                        duration_secs, active
                 FROM plans WHERE plan_id = ?1",
                params![plan_id],
                plan_from_row,
            )
            .optional()?;
        Ok(plan)
    }

    pub fn list_plans(&self, active_only: bool) -> LedgerResult<Vec<Plan>> {
        let mut stmt = self.conn.prepare(
            "SELECT plan_id, name, return_multiplier, min_deposit, max_deposit,
                    duration_secs, active
             FROM plans WHERE (?1 = 0 OR active = 1)
             ORDER BY plan_id ASC",
        )?;
        let rows = stmt
            .query_map(params![if active_only { 1 } else { 0 }], plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
