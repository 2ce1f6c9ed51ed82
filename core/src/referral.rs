//! Referral Graph and Commission Cascade.
//!
//! At registration the new account's referrer chain is walked upward and
//! one edge per ancestor is materialized, level 1 for the direct referrer
//! up to level `MAX_REFERRAL_DEPTH`. Edges are written once and never
//! recomputed. `referred_by` pointers are data, not a trusted structure:
//! the walk carries a visited set and a hard depth bound.

use crate::{
    clock::Clock,
    error::{LedgerError, LedgerResult},
    event::{record_in, LedgerEvent},
    store::{DownlineMember, LedgerStore},
    types::{new_id, AccountId, EntityId, Money},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// No commission propagates past this generation.
pub const MAX_REFERRAL_DEPTH: u8 = 5;

pub const EDGE_STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub edge_id: EntityId,
    pub referrer_id: AccountId,
    pub referred_id: AccountId,
    /// 1 = direct referrer.
    pub level: u8,
    pub commission_rate: Decimal,
    /// Running total of commission paid on this edge. Only ever grows.
    pub commission_amount: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Commission rate per generation, as a fraction of the base amount:
/// 10%, 5%, 3%, 2%, 1% for levels 1 through 5. Not configurable.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    rates: [Decimal; MAX_REFERRAL_DEPTH as usize],
}

impl RateTable {

    /// Rate for `level` (1-based), or `None` past the end of the table.
    pub fn rate_for(&self, level: u8) -> Option<Decimal> {
        let idx = usize::from(level).checked_sub(1)?;
        self.rates.get(idx).copied()
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rates: [
                Decimal::new(10, 2),
                Decimal::new(5, 2),
                Decimal::new(3, 2),
                Decimal::new(2, 2),
                Decimal::new(1, 2),
            ],
        }
    }
}

/// Materialize the new account's upline edges inside an open transaction.
///
/// Reads the ancestor chain under the caller's write lock, so the chain
/// cannot change mid-walk. A missing ancestor or a revisited account ends
/// the walk; neither fails the registration.
pub(crate) fn cascade_in(
    tx: &LedgerStore,
    rates: &RateTable,
    new_account_id: &str,
    referrer_id: Option<&str>,
    now: DateTime<Utc>,
) -> LedgerResult<Vec<ReferralEdge>> {
    let mut edges = Vec::new();
    let mut visited: HashSet<AccountId> = HashSet::from([new_account_id.to_string()]);
    let mut current = referrer_id.map(str::to_string);
    let mut level: u8 = 1;

    while let Some(ancestor) = current.take() {
        if level > MAX_REFERRAL_DEPTH {
            break;
        }
        let Some(rate) = rates.rate_for(level) else {
            break;
        };
        if !visited.insert(ancestor.clone()) {
            log::warn!(
                "referral cycle through {ancestor} while registering {new_account_id}; stopping at level {level}"
            );
            break;
        }
        let Some(parent) = tx.referred_by(&ancestor)? else {
            log::debug!("referral chain of {new_account_id} ends at missing account {ancestor}");
            break;
        };

        let edge = ReferralEdge {
            edge_id: new_id(),
            referrer_id: ancestor,
            referred_id: new_account_id.to_string(),
            level,
            commission_rate: rate,
            commission_amount: Money::ZERO,
            status: EDGE_STATUS_ACTIVE.to_string(),
            created_at: now,
        };
        tx.insert_edge(&edge)?;
        record_in(
            tx,
            &LedgerEvent::ReferralEdgeCreated {
                edge_id: edge.edge_id.clone(),
                referrer_id: edge.referrer_id.clone(),
                referred_id: edge.referred_id.clone(),
                level,
                commission_rate: rate,
            },
            now,
        )?;
        edges.push(edge);

        current = parent;
        level += 1;
    }

    Ok(edges)
}

/// One node of a referrer's downline, nested by generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferralNode {
    pub edge: ReferralEdge,
    pub username: String,
    pub children: Vec<ReferralNode>,
}

/// Nest a root's edges: a level-n edge hangs under the level-(n-1) edge
/// whose referred account directly referred it.
pub fn build_tree(
    edges: &[ReferralEdge],
    members: &HashMap<AccountId, DownlineMember>,
) -> Vec<ReferralNode> {
    nodes_at(None, 1, edges, members)
}

fn nodes_at(
    parent: Option<&str>,
    level: u8,
    edges: &[ReferralEdge],
    members: &HashMap<AccountId, DownlineMember>,
) -> Vec<ReferralNode> {
    edges
        .iter()
        .filter(|e| e.level == level)
        .filter(|e| match parent {
            None => true,
            Some(p) => {
                members
                    .get(&e.referred_id)
                    .and_then(|m| m.referred_by.as_deref())
                    == Some(p)
            }
        })
        .map(|e| ReferralNode {
            edge: e.clone(),
            username: members
                .get(&e.referred_id)
                .map(|m| m.username.clone())
                .unwrap_or_default(),
            children: if level < MAX_REFERRAL_DEPTH {
                nodes_at(Some(&e.referred_id), level + 1, edges, members)
            } else {
                Vec::new()
            },
        })
        .collect()
}

pub struct ReferralGraph {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    rates: RateTable,
}

impl ReferralGraph {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, rates: RateTable) -> Self {
        Self { store, clock, rates }
    }

    /// Run the cascade for an already inserted account.
    pub fn on_register(
        &self,
        new_account_id: &str,
        referrer_id: Option<&str>,
    ) -> LedgerResult<Vec<ReferralEdge>> {
        let now = self.clock.now();
        self.store.atomic(|tx| {
            if tx.get_account(new_account_id)?.is_none() {
                return Err(LedgerError::not_found("account", new_account_id));
            }
            if !tx.edges_for_referred(new_account_id)?.is_empty() {
                return Err(LedgerError::validation(format!(
                    "referral edges for {new_account_id} already exist"
                )));
            }
            cascade_in(tx, &self.rates, new_account_id, referrer_id, now)
        })
    }

    /// Edges on which `account_id` earns, optionally restricted to one level.
    pub fn get_edges(&self, account_id: &str, level: Option<u8>) -> LedgerResult<Vec<ReferralEdge>> {
        if let Some(l) = level {
            if !(1..=MAX_REFERRAL_DEPTH).contains(&l) {
                return Err(LedgerError::validation(format!(
                    "referral level must be 1..={MAX_REFERRAL_DEPTH}, got {l}"
                )));
            }
        }
        self.store.edges_for_referrer(account_id, level)
    }

    /// Edges that pay out of `account_id`'s activity.
    pub fn upline(&self, account_id: &str) -> LedgerResult<Vec<ReferralEdge>> {
        self.store.edges_for_referred(account_id)
    }

    pub fn referral_tree(&self, account_id: &str) -> LedgerResult<Vec<ReferralNode>> {
        self.store.snapshot(|tx| {
            if tx.get_account(account_id)?.is_none() {
                return Err(LedgerError::not_found("account", account_id));
            }
            let edges = tx.edges_for_referrer(account_id, None)?;
            let members = tx
                .downline_members(account_id)?
                .into_iter()
                .map(|m| (m.account_id.clone(), m))
                .collect();
            Ok(build_tree(&edges, &members))
        })
    }
}
