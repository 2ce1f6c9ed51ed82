//! Account Store: wallet balances and referral linkage.
//!
//! Balance arithmetic lives here and only here. Every mutation reads the
//! current balance and writes the new one inside the same store
//! transaction, so concurrent mutators of one account serialize.

use crate::{
    error::{LedgerError, LedgerResult},
    store::LedgerStore,
    types::{money_add, AccountId, Money, ParseEnumError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceOp {
    Add,
    /// Clamps at zero. A backstop only; user-initiated debits go through
    /// `debit_checked_in`.
    Subtract,
    /// Unconditional overwrite, reserved for administrative correction.
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub username: String,
    pub email: String,
    pub referral_code: String,
    pub wallet_balance: Money,
    pub referred_by: Option<AccountId>,
    pub active: bool,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a freshly registered account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_id: AccountId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub referral_code: String,
    pub referred_by: Option<AccountId>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Result of applying `op` to `current`. Never negative; a sum past the
/// decimal range is a validation error.
pub fn apply_op(current: Money, amount: Money, op: BalanceOp) -> LedgerResult<Money> {
    let next = match op {
        BalanceOp::Add => money_add(current, amount)?,
        BalanceOp::Subtract => current.checked_sub(amount).unwrap_or(Money::ZERO),
        BalanceOp::Set => amount,
    };
    Ok(next.max(Money::ZERO))
}

pub(crate) fn load_in(store: &LedgerStore, account_id: &str) -> LedgerResult<Account> {
    store
        .get_account(account_id)?
        .ok_or_else(|| LedgerError::not_found("account", account_id))
}

/// Adjust a balance inside an already open transaction.
pub(crate) fn adjust_in(
    store: &LedgerStore,
    account_id: &str,
    amount: Money,
    op: BalanceOp,
) -> LedgerResult<Account> {
    if amount.is_sign_negative() {
        return Err(LedgerError::validation(format!(
            "balance adjustment amount must not be negative, got {amount}"
        )));
    }
    let mut account = load_in(store, account_id)?;
    let next = apply_op(account.wallet_balance, amount, op)?;
    if op == BalanceOp::Subtract && account.wallet_balance < amount {
        log::warn!(
            "account {account_id}: subtract of {amount} clamped at zero (balance {})",
            account.wallet_balance
        );
    }
    store.write_balance(account_id, next)?;
    account.wallet_balance = next;
    Ok(account)
}

pub(crate) fn credit_in(store: &LedgerStore, account_id: &str, amount: Money) -> LedgerResult<Account> {
    adjust_in(store, account_id, amount, BalanceOp::Add)
}

/// Debit that refuses rather than clamps.
pub(crate) fn debit_checked_in(
    store: &LedgerStore,
    account_id: &str,
    amount: Money,
) -> LedgerResult<Account> {
    let account = load_in(store, account_id)?;
    ensure_funds(&account, amount)?;
    adjust_in(store, account_id, amount, BalanceOp::Subtract)
}

pub(crate) fn ensure_funds(account: &Account, amount: Money) -> LedgerResult<()> {
    if account.wallet_balance < amount {
        return Err(LedgerError::InsufficientBalance {
            account_id: account.account_id.clone(),
            available: account.wallet_balance,
            requested: amount,
        });
    }
    Ok(())
}

pub(crate) fn ensure_active(account: &Account) -> LedgerResult<()> {
    if !account.active {
        return Err(LedgerError::validation(format!(
            "account {} is deactivated",
            account.account_id
        )));
    }
    Ok(())
}

pub struct AccountStore {
    store: LedgerStore,
}

impl AccountStore {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn get_account(&self, account_id: &str) -> LedgerResult<Account> {
        load_in(&self.store, account_id)
    }

    pub fn find_by_referral_code(&self, code: &str) -> LedgerResult<Option<Account>> {
        self.store.account_by_referral_code(code)
    }

    pub fn find_by_username(&self, username: &str) -> LedgerResult<Option<Account>> {
        self.store.account_by_username(username)
    }

    /// Atomic balance adjustment. See `BalanceOp` for the semantics of each op.
    pub fn adjust_balance(
        &self,
        account_id: &str,
        amount: Money,
        op: BalanceOp,
    ) -> LedgerResult<Account> {
        self.store
            .atomic(|tx| adjust_in(tx, account_id, amount, op))
    }

    pub fn set_active(&self, account_id: &str, active: bool) -> LedgerResult<Account> {
        self.store.atomic(|tx| {
            if tx.set_account_active(account_id, active)? == 0 {
                return Err(LedgerError::not_found("account", account_id));
            }
            load_in(tx, account_id)
        })
    }

    pub fn set_role(&self, account_id: &str, role: Role) -> LedgerResult<Account> {
        self.store.atomic(|tx| {
            if tx.set_account_role(account_id, role)? == 0 {
                return Err(LedgerError::not_found("account", account_id));
            }
            load_in(tx, account_id)
        })
    }
}
