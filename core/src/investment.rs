//! Investment Registry: capital commitments to plans.
//!
//! Opening an investment is one store transaction: the balance check, the
//! wallet debit, the `investment` ledger entry and the Investment row all
//! commit together or not at all.

use crate::{
    account::{self, debit_checked_in, ensure_active, ensure_funds},
    clock::Clock,
    config::PlanConfig,
    error::{LedgerError, LedgerResult},
    event::{record_in, LedgerEvent},
    ledger::{append_in, EntryLink, LedgerEntryKind, NewEntry, PostingRules},
    store::LedgerStore,
    types::{money_mul, new_id, AccountId, EntityId, Money, ParseEnumError},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Completed,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for InvestmentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(ParseEnumError::new("investment status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub return_multiplier: Money,
    pub min_deposit: Money,
    pub max_deposit: Money,
    pub duration_secs: i64,
    pub active: bool,
}

impl Plan {
    pub fn term(&self) -> LedgerResult<Duration> {
        Duration::try_seconds(self.duration_secs).ok_or_else(|| {
            LedgerError::validation(format!(
                "plan '{}' term of {}s is out of range",
                self.plan_id, self.duration_secs
            ))
        })
    }

    pub fn accepts(&self, amount: Money) -> bool {
        amount >= self.min_deposit && amount <= self.max_deposit
    }

    /// When an investment opened at `start` on this plan matures.
    pub fn maturity_from(&self, start: DateTime<Utc>) -> LedgerResult<DateTime<Utc>> {
        start.checked_add_signed(self.term()?).ok_or_else(|| {
            LedgerError::validation(format!(
                "plan '{}' term of {}s runs past the supported calendar",
                self.plan_id, self.duration_secs
            ))
        })
    }
}

impl From<&PlanConfig> for Plan {
    fn from(cfg: &PlanConfig) -> Self {
        Self {
            plan_id: cfg.plan_id.clone(),
            name: cfg.name.clone(),
            return_multiplier: cfg.return_multiplier,
            min_deposit: cfg.min_deposit,
            max_deposit: cfg.max_deposit,
            duration_secs: cfg.duration_secs,
            active: cfg.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub investment_id: EntityId,
    pub account_id: AccountId,
    pub plan_id: String,
    pub amount: Money,
    /// The plan's multiplier when the investment opened; later plan edits
    /// do not reach it.
    pub return_multiplier: Money,
    pub status: InvestmentStatus,
    pub start_at: DateTime<Utc>,
    /// Fixed at creation; never moves.
    pub end_at: DateTime<Utc>,
    /// Set once, at maturity.
    pub profit: Option<Money>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Investment {
    /// Profit paid at maturity: principal times the locked-in multiplier.
    pub fn profit_due(&self) -> LedgerResult<Money> {
        money_mul(self.amount, self.return_multiplier)
    }
}

pub(crate) fn load_plan_in(tx: &LedgerStore, plan_id: &str) -> LedgerResult<Plan> {
    tx.get_plan(plan_id)?
        .ok_or_else(|| LedgerError::not_found("plan", plan_id))
}

pub struct InvestmentRegistry {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    rules: PostingRules,
}

impl InvestmentRegistry {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, rules: PostingRules) -> Self {
        Self { store, clock, rules }
    }

    /// Commit `amount` from the account's wallet to `plan_id`.
    ///
    /// Rejections (bounds, funds, inactive plan/account) happen before any
    /// write; a failure after the debit rolls the debit back.
    pub fn open(&self, account_id: &str, plan_id: &str, amount: Money) -> LedgerResult<Investment> {
        let now = self.clock.now();
        let investment = self.store.atomic(|tx| {
            let plan = load_plan_in(tx, plan_id)?;
            if !plan.active {
                return Err(LedgerError::validation(format!(
                    "plan '{plan_id}' is not open for new investments"
                )));
            }
            if !plan.accepts(amount) {
                return Err(LedgerError::validation(format!(
                    "amount {amount} outside plan '{plan_id}' bounds [{}, {}]",
                    plan.min_deposit, plan.max_deposit
                )));
            }
            let holder = account::load_in(tx, account_id)?;
            ensure_active(&holder)?;
            ensure_funds(&holder, amount)?;

            let investment = Investment {
                investment_id: new_id(),
                account_id: account_id.to_string(),
                plan_id: plan.plan_id.clone(),
                amount,
                return_multiplier: plan.return_multiplier,
                status: InvestmentStatus::Active,
                start_at: now,
                end_at: plan.maturity_from(now)?,
                profit: None,
                completed_at: None,
            };

            debit_checked_in(tx, account_id, amount)?;
            tx.insert_investment(&investment)?;
            append_in(
                tx,
                NewEntry::completed(account_id, LedgerEntryKind::Investment, amount)
                    .linked(EntryLink::Investment(investment.investment_id.clone())),
                &self.rules,
                now,
            )?;
            record_in(
                tx,
                &LedgerEvent::InvestmentOpened {
                    investment_id: investment.investment_id.clone(),
                    account_id: account_id.to_string(),
                    plan_id: plan.plan_id.clone(),
                    amount,
                    end_at: investment.end_at,
                },
                now,
            )?;
            Ok(investment)
        })?;

        log::info!(
            "investment {} opened: {} in '{}' for {}, matures {}",
            investment.investment_id,
            investment.amount,
            investment.plan_id,
            investment.account_id,
            investment.end_at
        );
        Ok(investment)
    }

    pub fn get(&self, investment_id: &str) -> LedgerResult<Investment> {
        self.store
            .get_investment(investment_id)?
            .ok_or_else(|| LedgerError::not_found("investment", investment_id))
    }

    pub fn investments_for_account(&self, account_id: &str) -> LedgerResult<Vec<Investment>> {
        self.store.investments_for_account(account_id)
    }

    pub fn get_plan(&self, plan_id: &str) -> LedgerResult<Plan> {
        load_plan_in(&self.store, plan_id)
    }

    pub fn plans(&self, active_only: bool) -> LedgerResult<Vec<Plan>> {
        self.store.list_plans(active_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan {
            plan_id: "p".into(),
            name: "P".into(),
            return_multiplier: Money::from(4),
            min_deposit: Money::from(50),
            max_deposit: Money::from(1000),
            duration_secs: 3600,
            active: true,
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let p = plan();
        assert!(p.accepts(Money::from(50)));
        assert!(p.accepts(Money::from(1000)));
        assert!(!p.accepts(Money::from(49)));
        assert!(!p.accepts("1000.01".parse().unwrap()));
    }

    fn investment(amount: Money) -> Investment {
        let now = Utc::now();
        Investment {
            investment_id: "i".into(),
            account_id: "a".into(),
            plan_id: "p".into(),
            amount,
            return_multiplier: plan().return_multiplier,
            status: InvestmentStatus::Active,
            start_at: now,
            end_at: now,
            profit: None,
            completed_at: None,
        }
    }

    #[test]
    fn profit_is_principal_times_multiplier() {
        assert_eq!(investment(Money::from(100)).profit_due().unwrap().to_string(), "400");
    }

    #[test]
    fn profit_past_decimal_range_is_refused() {
        let err = investment(Money::MAX).profit_due().unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn unrepresentable_term_is_refused() {
        let mut p = plan();
        p.duration_secs = i64::MAX / 2;
        assert!(matches!(p.term(), Err(LedgerError::Validation(_))));
        assert!(p.maturity_from(Utc::now()).is_err());
        p.duration_secs = 3600;
        let start = Utc::now();
        assert_eq!(p.maturity_from(start).unwrap(), start + Duration::hours(1));
    }
}
