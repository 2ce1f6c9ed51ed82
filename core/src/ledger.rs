//! Transaction Log: the append-only record of every balance-affecting
//! event, and the only path by which deposits, withdrawals and referral
//! commissions reach a wallet.
//!
//! Entries are immutable except for `status`, which moves
//! pending → completed or pending → rejected exactly once. Completing an
//! entry applies its balance effect in the same store transaction as the
//! status flip; a second completion signal finds the entry terminal and
//! does nothing.

use crate::{
    account::{self, credit_in, debit_checked_in, ensure_active, ensure_funds},
    clock::Clock,
    error::{LedgerError, LedgerResult},
    event::{record_in, LedgerEvent},
    store::LedgerStore,
    types::{money_mul, new_id, AccountId, EntityId, Money, ParseEnumError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Arc};

/// Decimal places kept on computed commission amounts.
pub const COMMISSION_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Deposit,
    Withdrawal,
    Investment,
    Profit,
    Referral,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Investment => "investment",
            Self::Profit => "profit",
            Self::Referral => "referral",
        }
    }
}

impl FromStr for LedgerEntryKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "investment" => Ok(Self::Investment),
            "profit" => Ok(Self::Profit),
            "referral" => Ok(Self::Referral),
            other => Err(ParseEnumError::new("ledger entry kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for EntryStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError::new("entry status", other)),
        }
    }
}

/// What an entry is about, beyond its account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntryLink {
    Investment(EntityId),
    ReferralEdge(EntityId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntityId,
    pub account_id: AccountId,
    pub kind: LedgerEntryKind,
    pub amount: Money,
    pub currency: String,
    pub status: EntryStatus,
    pub method: Option<String>,
    /// External payment reference; unique when present.
    pub reference: Option<String>,
    pub link: Option<EntryLink>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Append request. Id, currency and timestamps are assigned by the log.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub kind: LedgerEntryKind,
    pub amount: Money,
    pub status: EntryStatus,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub link: Option<EntryLink>,
}

impl NewEntry {
    pub fn completed(account_id: &str, kind: LedgerEntryKind, amount: Money) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind,
            amount,
            status: EntryStatus::Completed,
            method: None,
            reference: None,
            link: None,
        }
    }

    pub fn pending(account_id: &str, kind: LedgerEntryKind, amount: Money) -> Self {
        Self {
            status: EntryStatus::Pending,
            ..Self::completed(account_id, kind, amount)
        }
    }

    pub fn linked(mut self, link: EntryLink) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn with_reference(mut self, reference: String) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Outcome of `transition`.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The entry left `pending` and its effect (if any) was applied.
    Applied(LedgerEntry),
    /// The entry was already terminal; nothing happened.
    Unchanged(LedgerEntry),
}

impl Transition {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Applied(e) | Self::Unchanged(e) => e,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Settings every writer of ledger entries needs.
#[derive(Debug, Clone)]
pub struct PostingRules {
    pub currency: String,
    /// Pay upline edges their rate when a deposit completes.
    pub pay_commission_on_deposit: bool,
    /// Largest single deposit or withdrawal accepted.
    pub max_entry_amount: Money,
}

// ── In-transaction operations ──────────────────────────────────

fn validate_new(entry: &NewEntry, rules: &PostingRules) -> LedgerResult<()> {
    if entry.amount <= Money::ZERO {
        return Err(LedgerError::validation(format!(
            "{} amount must be positive, got {}",
            entry.kind.as_str(),
            entry.amount
        )));
    }
    if matches!(entry.kind, LedgerEntryKind::Deposit | LedgerEntryKind::Withdrawal)
        && entry.amount > rules.max_entry_amount
    {
        return Err(LedgerError::validation(format!(
            "{} amount {} exceeds the limit of {}",
            entry.kind.as_str(),
            entry.amount,
            rules.max_entry_amount
        )));
    }
    match (entry.kind, &entry.link) {
        (LedgerEntryKind::Referral, Some(EntryLink::ReferralEdge(_))) => Ok(()),
        (LedgerEntryKind::Referral, _) => Err(LedgerError::validation(
            "referral entry must link to a referral edge",
        )),
        (LedgerEntryKind::Investment | LedgerEntryKind::Profit, Some(EntryLink::Investment(_))) => {
            Ok(())
        }
        (LedgerEntryKind::Investment | LedgerEntryKind::Profit, _) => Err(LedgerError::validation(
            format!("{} entry must link to an investment", entry.kind.as_str()),
        )),
        (LedgerEntryKind::Deposit | LedgerEntryKind::Withdrawal, _) => Ok(()),
    }
}

/// Append inside an open transaction. A `completed` entry applies its
/// balance effect before this returns.
pub(crate) fn append_in(
    tx: &LedgerStore,
    new: NewEntry,
    rules: &PostingRules,
    now: DateTime<Utc>,
) -> LedgerResult<LedgerEntry> {
    validate_new(&new, rules)?;
    account::load_in(tx, &new.account_id)?;
    match &new.link {
        Some(EntryLink::ReferralEdge(id)) => {
            tx.get_edge(id)?
                .ok_or_else(|| LedgerError::not_found("referral edge", id))?;
        }
        Some(EntryLink::Investment(id)) => {
            tx.get_investment(id)?
                .ok_or_else(|| LedgerError::not_found("investment", id))?;
        }
        None => {}
    }

    let entry = LedgerEntry {
        entry_id: new_id(),
        account_id: new.account_id,
        kind: new.kind,
        amount: new.amount,
        currency: rules.currency.clone(),
        status: new.status,
        method: new.method,
        reference: new.reference,
        link: new.link,
        created_at: now,
        resolved_at: new.status.is_terminal().then_some(now),
    };
    tx.insert_entry(&entry)?;

    match entry.status {
        EntryStatus::Completed => apply_completion(tx, &entry, rules, now)?,
        EntryStatus::Pending => record_in(
            tx,
            &LedgerEvent::EntryRequested {
                entry_id: entry.entry_id.clone(),
                account_id: entry.account_id.clone(),
                kind: entry.kind,
                amount: entry.amount,
                reference: entry.reference.clone(),
            },
            now,
        )?,
        EntryStatus::Rejected => {}
    }
    Ok(entry)
}

/// One handler per entry kind. Investment and profit entries record a
/// wallet movement their caller already made in the same transaction.
fn apply_completion(
    tx: &LedgerStore,
    entry: &LedgerEntry,
    rules: &PostingRules,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    match entry.kind {
        LedgerEntryKind::Deposit => {
            credit_in(tx, &entry.account_id, entry.amount)?;
            completed_event(tx, entry, now)?;
            if rules.pay_commission_on_deposit {
                pay_commissions_in(tx, entry, rules, now)?;
            }
        }
        LedgerEntryKind::Withdrawal => {
            debit_checked_in(tx, &entry.account_id, entry.amount)?;
            completed_event(tx, entry, now)?;
        }
        LedgerEntryKind::Referral => {
            let Some(EntryLink::ReferralEdge(edge_id)) = &entry.link else {
                return Err(LedgerError::validation(
                    "referral entry must link to a referral edge",
                ));
            };
            let edge = tx
                .get_edge(edge_id)?
                .ok_or_else(|| LedgerError::not_found("referral edge", edge_id))?;
            if edge.referrer_id != entry.account_id {
                return Err(LedgerError::validation(format!(
                    "referral entry for {} does not match edge referrer {}",
                    entry.account_id, edge.referrer_id
                )));
            }
            credit_in(tx, &entry.account_id, entry.amount)?;
            tx.accrete_commission(edge_id, entry.amount)?;
            record_in(
                tx,
                &LedgerEvent::CommissionPaid {
                    edge_id: edge.edge_id.clone(),
                    referrer_id: edge.referrer_id.clone(),
                    referred_id: edge.referred_id.clone(),
                    level: edge.level,
                    amount: entry.amount,
                },
                now,
            )?;
        }
        LedgerEntryKind::Investment | LedgerEntryKind::Profit => {}
    }
    Ok(())
}

fn completed_event(tx: &LedgerStore, entry: &LedgerEntry, now: DateTime<Utc>) -> LedgerResult<()> {
    record_in(
        tx,
        &LedgerEvent::EntryCompleted {
            entry_id: entry.entry_id.clone(),
            account_id: entry.account_id.clone(),
            kind: entry.kind,
            amount: entry.amount,
        },
        now,
    )
}

/// Credit every upline edge of the depositor with its share of the deposit.
fn pay_commissions_in(
    tx: &LedgerStore,
    deposit: &LedgerEntry,
    rules: &PostingRules,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    for edge in tx.edges_for_referred(&deposit.account_id)? {
        let commission = money_mul(deposit.amount, edge.commission_rate)?.round_dp(COMMISSION_SCALE);
        if commission <= Money::ZERO {
            continue;
        }
        let referrer = account::load_in(tx, &edge.referrer_id)?;
        if !referrer.active {
            log::info!(
                "skipping level-{} commission for deactivated referrer {}",
                edge.level,
                referrer.account_id
            );
            continue;
        }
        let entry = NewEntry::completed(&edge.referrer_id, LedgerEntryKind::Referral, commission)
            .linked(EntryLink::ReferralEdge(edge.edge_id.clone()));
        append_in(tx, entry, rules, now)?;
    }
    Ok(())
}

pub(crate) fn transition_in(
    tx: &LedgerStore,
    entry_id: &str,
    status: EntryStatus,
    rules: &PostingRules,
    now: DateTime<Utc>,
) -> LedgerResult<Transition> {
    if !status.is_terminal() {
        return Err(LedgerError::validation(
            "entries can only transition to completed or rejected",
        ));
    }
    let entry = tx
        .get_entry(entry_id)?
        .ok_or_else(|| LedgerError::not_found("ledger entry", entry_id))?;
    if entry.status.is_terminal() {
        log::debug!(
            "entry {entry_id} already {}, ignoring {} signal",
            entry.status.as_str(),
            status.as_str()
        );
        return Ok(Transition::Unchanged(entry));
    }
    if tx.resolve_entry(entry_id, status, now)? == 0 {
        return Ok(Transition::Unchanged(entry));
    }
    let resolved = LedgerEntry {
        status,
        resolved_at: Some(now),
        ..entry
    };
    match status {
        EntryStatus::Completed => apply_completion(tx, &resolved, rules, now)?,
        _ => record_in(
            tx,
            &LedgerEvent::EntryRejected {
                entry_id: resolved.entry_id.clone(),
                account_id: resolved.account_id.clone(),
                kind: resolved.kind,
                amount: resolved.amount,
            },
            now,
        )?,
    }
    log::info!(
        "entry {entry_id} ({}) {} -> {}",
        resolved.kind.as_str(),
        EntryStatus::Pending.as_str(),
        status.as_str()
    );
    Ok(Transition::Applied(resolved))
}

// ── Service ────────────────────────────────────────────────────

pub struct TransactionLog {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    rules: PostingRules,
}

impl TransactionLog {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, rules: PostingRules) -> Self {
        Self { store, clock, rules }
    }

    pub fn append(&self, entry: NewEntry) -> LedgerResult<LedgerEntry> {
        let now = self.clock.now();
        self.store
            .atomic(|tx| append_in(tx, entry.clone(), &self.rules, now))
    }

    /// Resolve a pending entry. Idempotent: a terminal entry is returned
    /// unchanged.
    pub fn transition(&self, entry_id: &str, status: EntryStatus) -> LedgerResult<Transition> {
        let now = self.clock.now();
        self.store
            .atomic(|tx| transition_in(tx, entry_id, status, &self.rules, now))
    }

    /// Completion signal from a payment collaborator.
    pub fn transition_by_reference(
        &self,
        reference: &str,
        status: EntryStatus,
    ) -> LedgerResult<Transition> {
        let now = self.clock.now();
        self.store.atomic(|tx| {
            let entry = tx
                .entry_by_reference(reference)?
                .ok_or_else(|| LedgerError::not_found("payment reference", reference))?;
            transition_in(tx, &entry.entry_id, status, &self.rules, now)
        })
    }

    pub fn get_entry(&self, entry_id: &str) -> LedgerResult<LedgerEntry> {
        self.store
            .get_entry(entry_id)?
            .ok_or_else(|| LedgerError::not_found("ledger entry", entry_id))
    }

    pub fn entries_for_account(
        &self,
        account_id: &str,
        kind: Option<LedgerEntryKind>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.store.entries_for_account(account_id, kind)
    }

    /// Open a deposit awaiting the payment collaborator's confirmation.
    /// The returned reference is what the gateway echoes back.
    pub fn request_deposit(
        &self,
        account_id: &str,
        amount: Money,
        method: &str,
    ) -> LedgerResult<LedgerEntry> {
        let now = self.clock.now();
        self.store.atomic(|tx| {
            let account = account::load_in(tx, account_id)?;
            ensure_active(&account)?;
            let entry = NewEntry::pending(account_id, LedgerEntryKind::Deposit, amount)
                .with_method(method)
                .with_reference(format!("DEP-{}", new_id()));
            append_in(tx, entry, &self.rules, now)
        })
    }

    /// Open a withdrawal awaiting approval. Funds are checked now and again
    /// on approval; nothing is debited until then.
    pub fn request_withdrawal(
        &self,
        account_id: &str,
        amount: Money,
        method: &str,
    ) -> LedgerResult<LedgerEntry> {
        let now = self.clock.now();
        self.store.atomic(|tx| {
            let account = account::load_in(tx, account_id)?;
            ensure_active(&account)?;
            ensure_funds(&account, amount)?;
            let entry = NewEntry::pending(account_id, LedgerEntryKind::Withdrawal, amount)
                .with_method(method)
                .with_reference(format!("WDR-{}", new_id()));
            append_in(tx, entry, &self.rules, now)
        })
    }
}
