use super::{decimal_col, time_col, LedgerStore};
use crate::{
    error::{LedgerError, LedgerResult},
    referral::ReferralEdge,
    types::{money_add, to_millis, AccountId, Money},
};
use rusqlite::{params, OptionalExtension, Row};

const EDGE_COLUMNS: &str = "edge_id, referrer_id, referred_id, level, commission_rate,
     commission_amount, status, created_at";

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<ReferralEdge> {
    Ok(ReferralEdge {
        edge_id: row.get(0)?,
        referrer_id: row.get(1)?,
        referred_id: row.get(2)?,
        level: row.get(3)?,
        commission_rate: decimal_col(row, 4)?,
        commission_amount: decimal_col(row, 5)?,
        status: row.get(6)?,
        created_at: time_col(row, 7)?,
    })
}

/// An account somewhere below a referrer, with its own parent pointer.
#[derive(Debug, Clone)]
pub struct DownlineMember {
    pub account_id: AccountId,
    pub username: String,
    pub referred_by: Option<AccountId>,
}

impl LedgerStore {
    // ── Referral edges ────────────────────────────────────────────

    pub fn insert_edge(&self, edge: &ReferralEdge) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO referral_edges (
                edge_id, referrer_id, referred_id, level, commission_rate,
                commission_amount, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                edge.edge_id,
                edge.referrer_id,
                edge.referred_id,
                edge.level,
                edge.commission_rate.to_string(),
                edge.commission_amount.to_string(),
                edge.status,
                to_millis(edge.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_edge(&self, edge_id: &str) -> LedgerResult<Option<ReferralEdge>> {
        let edge = self
            .conn
            .query_row(
                &format!("SELECT {EDGE_COLUMNS} FROM referral_edges WHERE edge_id = ?1"),
                params![edge_id],
                edge_from_row,
            )
            .optional()?;
        Ok(edge)
    }

    /// Edges on which `referrer_id` earns, optionally one generation only.
    pub fn edges_for_referrer(
        &self,
        referrer_id: &str,
        level: Option<u8>,
    ) -> LedgerResult<Vec<ReferralEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edges
             WHERE referrer_id = ?1 AND (?2 IS NULL OR level = ?2)
             ORDER BY level ASC, created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![referrer_id, level], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Edges that pay out of `referred_id`'s activity, nearest ancestor first.
    pub fn edges_for_referred(&self, referred_id: &str) -> LedgerResult<Vec<ReferralEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM referral_edges
             WHERE referred_id = ?1
             ORDER BY level ASC"
        ))?;
        let rows = stmt
            .query_map(params![referred_id], edge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Add `amount` to the edge's running commission total.
    pub fn accrete_commission(&self, edge_id: &str, amount: Money) -> LedgerResult<Money> {
        let edge = self
            .get_edge(edge_id)?
            .ok_or_else(|| LedgerError::not_found("referral edge", edge_id))?;
        let total = money_add(edge.commission_amount, amount)?;
        self.conn.execute(
            "UPDATE referral_edges SET commission_amount = ?1 WHERE edge_id = ?2",
            params![total.to_string(), edge_id],
        )?;
        Ok(total)
    }

    pub fn downline_members(&self, referrer_id: &str) -> LedgerResult<Vec<DownlineMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.account_id, a.username, a.referred_by
             FROM referral_edges e
             JOIN accounts a ON a.account_id = e.referred_id
             WHERE e.referrer_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![referrer_id], |row| {
                Ok(DownlineMember {
                    account_id: row.get(0)?,
                    username: row.get(1)?,
                    referred_by: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn direct_referral_count(&self, referrer_id: &str) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM referral_edges WHERE referrer_id = ?1 AND level = 1",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
