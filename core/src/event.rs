//! User-facing events, doubling as the notification outbox.
//!
//! RULE: every event is written to `event_log` inside the same database
//! transaction as the state change it describes. Delivery to users (mail,
//! push, websocket) is an external collaborator that tails the log.

use crate::{
    error::LedgerResult,
    ledger::LedgerEntryKind,
    store::LedgerStore,
    types::{AccountId, EntityId, Money},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every event the ledger emits.
/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    // ── Registration ──────────────────────────────
    AccountRegistered {
        account_id: AccountId,
        username: String,
        referred_by: Option<AccountId>,
    },
    ReferralEdgeCreated {
        edge_id: EntityId,
        referrer_id: AccountId,
        referred_id: AccountId,
        level: u8,
        commission_rate: Money,
    },

    // ── Transaction log ───────────────────────────
    EntryRequested {
        entry_id: EntityId,
        account_id: AccountId,
        kind: LedgerEntryKind,
        amount: Money,
        reference: Option<String>,
    },
    EntryCompleted {
        entry_id: EntityId,
        account_id: AccountId,
        kind: LedgerEntryKind,
        amount: Money,
    },
    EntryRejected {
        entry_id: EntityId,
        account_id: AccountId,
        kind: LedgerEntryKind,
        amount: Money,
    },
    CommissionPaid {
        edge_id: EntityId,
        referrer_id: AccountId,
        referred_id: AccountId,
        level: u8,
        amount: Money,
    },

    // ── Investments ───────────────────────────────
    InvestmentOpened {
        investment_id: EntityId,
        account_id: AccountId,
        plan_id: String,
        amount: Money,
        end_at: DateTime<Utc>,
    },
    InvestmentMatured {
        investment_id: EntityId,
        account_id: AccountId,
        principal: Money,
        profit: Money,
        total_return: Money,
    },
}

impl LedgerEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AccountRegistered { .. } => "account_registered",
            Self::ReferralEdgeCreated { .. } => "referral_edge_created",
            Self::EntryRequested { .. } => "entry_requested",
            Self::EntryCompleted { .. } => "entry_completed",
            Self::EntryRejected { .. } => "entry_rejected",
            Self::CommissionPaid { .. } => "commission_paid",
            Self::InvestmentOpened { .. } => "investment_opened",
            Self::InvestmentMatured { .. } => "investment_matured",
        }
    }

    /// The account whose user should be notified.
    pub fn account_id(&self) -> &str {
        match self {
            Self::AccountRegistered { account_id, .. }
            | Self::EntryRequested { account_id, .. }
            | Self::EntryCompleted { account_id, .. }
            | Self::EntryRejected { account_id, .. }
            | Self::InvestmentOpened { account_id, .. }
            | Self::InvestmentMatured { account_id, .. } => account_id,
            Self::ReferralEdgeCreated { referrer_id, .. }
            | Self::CommissionPaid { referrer_id, .. } => referrer_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub account_id: Option<AccountId>,
    pub event_type: String,
    pub payload: String, // JSON-serialized LedgerEvent
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn from_event(event: &LedgerEvent, at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            account_id: Some(event.account_id().to_string()),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
            created_at: at,
        })
    }

    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}

/// Write `event` to the outbox as part of the caller's open transaction.
pub(crate) fn record_in(tx: &LedgerStore, event: &LedgerEvent, at: DateTime<Utc>) -> LedgerResult<()> {
    tx.append_event(&EventLogEntry::from_event(event, at)?)
}
