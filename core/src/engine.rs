//! The composition root.
//!
//! Builds every service once, each on its own connection to the same
//! database, and owns the maturation thread's start/stop lifecycle.
//! Nothing in this crate constructs services at import time.
//!
//! Dependency order (leaves first):
//!   1. AccountStore
//!   2. TransactionLog
//!   3. ReferralGraph (+ Registrar, which runs the cascade)
//!   4. InvestmentRegistry
//!   5. MaturationScheduler

use crate::{
    account::{Account, AccountStore},
    clock::{Clock, ManualClock},
    config::LedgerConfig,
    dashboard::{stats_in, DashboardStats},
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    investment::{Investment, InvestmentRegistry, Plan},
    ledger::{EntryStatus, LedgerEntry, LedgerEntryKind, PostingRules, TransactionLog, Transition},
    maturation::{MaturationProcessor, MaturationScheduler, SweepOutcome},
    referral::{RateTable, ReferralGraph, ReferralNode},
    registration::{Registrar, Registration},
    store::LedgerStore,
    types::Money,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};

/// Every service behind one handle.
///
/// Each service owns a `rusqlite::Connection`, so an engine is `Send` but
/// not `Sync`: move it to a thread, or build one engine per thread against
/// the same database file. Writes from separate engines serialize through
/// SQLite's write lock. Sweep single-flight holds per engine; engines that
/// each start a scheduler may sweep concurrently, and the conditional
/// status flip still pays every investment once.
pub struct LedgerEngine {
    pub config: LedgerConfig,
    /// Root connection: dashboard reads, and keeps in-memory databases alive.
    pub store: LedgerStore,
    pub accounts: AccountStore,
    pub ledger: TransactionLog,
    pub referrals: ReferralGraph,
    pub registrar: Registrar,
    pub investments: InvestmentRegistry,
    maturation: MaturationScheduler,
}

impl LedgerEngine {
    /// Migrate, seed plans from config, and wire every service.
    pub fn build(store: &LedgerStore, config: LedgerConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        store.migrate()?;
        store.atomic(|tx| {
            for plan in config.plans.values() {
                tx.upsert_plan(&Plan::from(plan))?;
            }
            Ok(())
        })?;

        let rules = PostingRules {
            currency: config.currency.clone(),
            pay_commission_on_deposit: config.referral.pay_on_deposit,
            max_entry_amount: config.max_entry_amount,
        };
        let rates = RateTable::default();

        let processor = MaturationProcessor::new(store.reopen()?, Arc::clone(&clock), rules.clone());

        let engine = Self {
            accounts: AccountStore::new(store.reopen()?),
            ledger: TransactionLog::new(store.reopen()?, Arc::clone(&clock), rules.clone()),
            referrals: ReferralGraph::new(store.reopen()?, Arc::clone(&clock), rates.clone()),
            registrar: Registrar::new(
                store.reopen()?,
                Arc::clone(&clock),
                rates,
                config.password_hash.clone(),
            ),
            investments: InvestmentRegistry::new(store.reopen()?, Arc::clone(&clock), rules),
            maturation: MaturationScheduler::new(processor),
            store: store.reopen()?,
            config,
        };
        log::info!(
            "ledger engine ready: db={} plans={} currency={}",
            engine.store.path(),
            engine.config.plans.len(),
            engine.config.currency
        );
        Ok(engine)
    }

    /// In-memory engine with test config and a manually driven clock.
    pub fn build_test() -> LedgerResult<(Self, ManualClock)> {
        let config = LedgerConfig::default_test();
        let store = LedgerStore::in_memory(&config.store)?;
        let clock = ManualClock::new(Utc::now());
        let engine = Self::build(&store, config, Arc::new(clock.clone()))?;
        Ok((engine, clock))
    }

    // ── API surface ────────────────────────────────────────────

    pub fn register_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        referral_code: Option<&str>,
    ) -> LedgerResult<Account> {
        self.registrar.register(&Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            referral_code: referral_code.map(str::to_string),
        })
    }

    pub fn open_investment(&self, account_id: &str, plan_id: &str, amount: Money) -> LedgerResult<Investment> {
        self.investments.open(account_id, plan_id, amount)
    }

    pub fn request_deposit(&self, account_id: &str, amount: Money, method: &str) -> LedgerResult<LedgerEntry> {
        self.ledger.request_deposit(account_id, amount, method)
    }

    pub fn request_withdrawal(&self, account_id: &str, amount: Money, method: &str) -> LedgerResult<LedgerEntry> {
        self.ledger.request_withdrawal(account_id, amount, method)
    }

    /// Payment collaborator's completion signal.
    pub fn confirm_payment(&self, reference: &str, status: EntryStatus) -> LedgerResult<Transition> {
        self.ledger.transition_by_reference(reference, status)
    }

    pub fn approve_entry(&self, entry_id: &str) -> LedgerResult<Transition> {
        self.ledger.transition(entry_id, EntryStatus::Completed)
    }

    pub fn reject_entry(&self, entry_id: &str) -> LedgerResult<Transition> {
        self.ledger.transition(entry_id, EntryStatus::Rejected)
    }

    pub fn get_account(&self, account_id: &str) -> LedgerResult<Account> {
        self.accounts.get_account(account_id)
    }

    pub fn entries(&self, account_id: &str, kind: Option<LedgerEntryKind>) -> LedgerResult<Vec<LedgerEntry>> {
        self.ledger.entries_for_account(account_id, kind)
    }

    pub fn investments_for(&self, account_id: &str) -> LedgerResult<Vec<Investment>> {
        self.investments.investments_for_account(account_id)
    }

    pub fn dashboard_stats(&self, account_id: &str) -> LedgerResult<DashboardStats> {
        self.store.snapshot(|tx| stats_in(tx, account_id))
    }

    pub fn referral_tree(&self, account_id: &str) -> LedgerResult<Vec<ReferralNode>> {
        self.referrals.referral_tree(account_id)
    }

    /// Decoded notification outbox for one account, oldest first.
    pub fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.store
            .events_for_account(account_id)?
            .iter()
            .map(|e| e.decode().map_err(LedgerError::from))
            .collect()
    }

    // ── Maturation lifecycle ───────────────────────────────────

    pub fn sweep_now(&self) -> LedgerResult<SweepOutcome> {
        self.maturation.run_once()
    }

    pub fn start_maturation(&mut self) -> LedgerResult<()> {
        let interval = Duration::from_secs(self.config.maturation.sweep_interval_secs.max(1));
        self.maturation.start(interval)
    }

    pub fn start_maturation_every(&mut self, interval: Duration) -> LedgerResult<()> {
        self.maturation.start(interval)
    }

    pub fn stop_maturation(&mut self) {
        self.maturation.stop();
    }

    pub fn maturation_running(&self) -> bool {
        self.maturation.is_running()
    }
}
