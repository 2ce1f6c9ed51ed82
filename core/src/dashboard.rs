//! Per-account dashboard figures, read from one consistent snapshot.

use crate::{
    account,
    error::LedgerResult,
    ledger::LedgerEntryKind,
    store::LedgerStore,
    types::Money,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub wallet_balance: Money,
    /// Principal ever committed, matured or not.
    pub total_invested: Money,
    /// Profit realized by matured investments.
    pub total_earnings: Money,
    /// Commission credited through completed referral entries.
    pub referral_earnings: Money,
    /// Direct (level-1) referrals.
    pub referral_count: i64,
}

pub(crate) fn stats_in(tx: &LedgerStore, account_id: &str) -> LedgerResult<DashboardStats> {
    let holder = account::load_in(tx, account_id)?;
    Ok(DashboardStats {
        wallet_balance: holder.wallet_balance,
        total_invested: tx.invested_total(account_id)?,
        total_earnings: tx.realized_profit_total(account_id)?,
        referral_earnings: tx.completed_total(account_id, LedgerEntryKind::Referral)?,
        referral_count: tx.direct_referral_count(account_id)?,
    })
}
