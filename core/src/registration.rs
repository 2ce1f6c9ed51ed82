//! Account registration: validation, credential hashing, account insert
//! and the commission cascade, all in one store transaction.

use crate::{
    account::{self, Account, NewAccount, Role},
    clock::Clock,
    config::PasswordHashConfig,
    error::{LedgerError, LedgerResult},
    event::{record_in, LedgerEvent},
    referral::{cascade_in, RateTable},
    store::LedgerStore,
    types::new_id,
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;

const MIN_PASSWORD_LEN: usize = 8;
const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub referral_code: Option<String>,
}

pub struct Registrar {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    rates: RateTable,
    hashing: PasswordHashConfig,
}

impl Registrar {
    pub fn new(
        store: LedgerStore,
        clock: Arc<dyn Clock>,
        rates: RateTable,
        hashing: PasswordHashConfig,
    ) -> Self {
        Self {
            store,
            clock,
            rates,
            hashing,
        }
    }

    /// Create the account and its referral edges.
    ///
    /// An unknown referral code registers the account without a referrer;
    /// it is not an error.
    pub fn register(&self, req: &Registration) -> LedgerResult<Account> {
        let username = req.username.trim();
        let email = req.email.trim().to_lowercase();
        validate(username, &email, &req.password)?;
        // Hash outside the write lock; it is the slow part.
        let password_hash = hash_password(&self.hashing, &req.password)?;
        let now = self.clock.now();

        let account = self.store.atomic(|tx| {
            if tx.account_by_username(username)?.is_some() {
                return Err(LedgerError::validation(format!(
                    "username '{username}' is already taken"
                )));
            }
            if tx.email_registered(&email)? {
                return Err(LedgerError::validation(format!(
                    "email '{email}' is already registered"
                )));
            }

            let referrer = match req.referral_code.as_deref().map(str::trim) {
                Some(code) if !code.is_empty() => {
                    let found = tx.account_by_referral_code(code)?;
                    if found.is_none() {
                        log::warn!("registration of '{username}' used unknown referral code {code}");
                    }
                    found
                }
                _ => None,
            };

            let new = NewAccount {
                account_id: new_id(),
                username: username.to_string(),
                email: email.clone(),
                password_hash: password_hash.clone(),
                referral_code: unused_referral_code(tx)?,
                referred_by: referrer.as_ref().map(|r| r.account_id.clone()),
                role: Role::User,
                created_at: now,
            };
            tx.insert_account(&new)?;
            record_in(
                tx,
                &LedgerEvent::AccountRegistered {
                    account_id: new.account_id.clone(),
                    username: new.username.clone(),
                    referred_by: new.referred_by.clone(),
                },
                now,
            )?;

            let edges = cascade_in(
                tx,
                &self.rates,
                &new.account_id,
                new.referred_by.as_deref(),
                now,
            )?;
            log::info!(
                "registered {} ({}) with {} referral edge(s)",
                new.username,
                new.account_id,
                edges.len()
            );
            account::load_in(tx, &new.account_id)
        })?;
        Ok(account)
    }

    /// Check a username/password pair. `None` for unknown users, bad
    /// passwords and deactivated accounts alike.
    pub fn verify_credentials(&self, username: &str, password: &str) -> LedgerResult<Option<Account>> {
        let Some(account) = self.store.account_by_username(username.trim())? else {
            return Ok(None);
        };
        let Some(stored) = self.store.password_hash(&account.account_id)? else {
            return Ok(None);
        };
        if account.active && verify_password(&stored, password)? {
            Ok(Some(account))
        } else {
            Ok(None)
        }
    }
}

fn validate(username: &str, email: &str, password: &str) -> LedgerResult<()> {
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(LedgerError::validation(format!(
            "username must be {}..={} characters",
            USERNAME_LEN.start(),
            USERNAME_LEN.end()
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(LedgerError::validation(
            "username may only contain letters, digits, '_', '.' and '-'",
        ));
    }
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(LedgerError::validation(format!("'{email}' is not an email address")));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(LedgerError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn unused_referral_code(tx: &LedgerStore) -> LedgerResult<String> {
    for _ in 0..8 {
        let code: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
            .to_uppercase();
        if tx.account_by_referral_code(&code)?.is_none() {
            return Ok(code);
        }
    }
    Err(anyhow::anyhow!("could not allocate a unique referral code").into())
}

fn hasher(cfg: &PasswordHashConfig) -> LedgerResult<Argon2<'static>> {
    let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
        .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub fn hash_password(cfg: &PasswordHashConfig, password: &str) -> LedgerResult<String> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("salt encoding failed: {e}"))?;
    let hash = hasher(cfg)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// Parameters are read from the PHC string itself.
pub fn verify_password(stored: &str, password: &str) -> LedgerResult<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| LedgerError::Corrupt(format!("password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
