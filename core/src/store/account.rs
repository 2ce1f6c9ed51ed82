use super::{decimal_col, time_col, LedgerStore};
use crate::{
    account::{Account, NewAccount, Role},
    error::LedgerResult,
    types::{to_millis, AccountId, Money},
};
use rusqlite::{params, OptionalExtension, Row};

const ACCOUNT_COLUMNS: &str = "account_id, username, email, referral_code, wallet_balance,
     referred_by, active, role, created_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        referral_code: row.get(3)?,
        wallet_balance: decimal_col(row, 4)?,
        referred_by: row.get(5)?,
        active: row.get::<_, i32>(6)? != 0,
        role: row.get(7)?,
        created_at: time_col(row, 8)?,
    })
}

impl LedgerStore {
    // ── Account ───────────────────────────────────────────────────

    pub fn insert_account(&self, account: &NewAccount) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO accounts (
                account_id, username, email, password_hash, referral_code,
                wallet_balance, referred_by, active, role, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, '0', ?6, 1, ?7, ?8)",
            params![
                account.account_id,
                account.username,
                account.email,
                account.password_hash,
                account.referral_code,
                account.referred_by,
                account.role,
                to_millis(account.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = ?1"),
                params![account_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn account_by_referral_code(&self, code: &str) -> LedgerResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE referral_code = ?1"),
                params![code],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn account_by_username(&self, username: &str) -> LedgerResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1"),
                params![username],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn email_registered(&self, email: &str) -> LedgerResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE email = ?1 COLLATE NOCASE",
            params![email],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn password_hash(&self, account_id: &str) -> LedgerResult<Option<String>> {
        let hash = self
            .conn
            .query_row(
                "SELECT password_hash FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Parent pointer for the referral walk.
    /// Outer `None`: the account does not exist.
    pub fn referred_by(&self, account_id: &str) -> LedgerResult<Option<Option<AccountId>>> {
        let parent = self
            .conn
            .query_row(
                "SELECT referred_by FROM accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(parent)
    }

    /// Overwrite the stored balance. Callers compute the new value inside
    /// the same transaction they read the old one in.
    pub fn write_balance(&self, account_id: &str, balance: Money) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE accounts SET wallet_balance = ?1 WHERE account_id = ?2",
            params![balance.to_string(), account_id],
        )?;
        Ok(changed)
    }

    /// Rewrite a parent pointer. Only tests need to forge a damaged chain.
    #[cfg(test)]
    pub(crate) fn relink_referrer(&self, account_id: &str, referrer_id: Option<&str>) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE accounts SET referred_by = ?1 WHERE account_id = ?2",
            params![referrer_id, account_id],
        )?;
        Ok(changed)
    }

    pub fn set_account_active(&self, account_id: &str, active: bool) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE accounts SET active = ?1 WHERE account_id = ?2",
            params![if active { 1 } else { 0 }, account_id],
        )?;
        Ok(changed)
    }

    pub fn set_account_role(&self, account_id: &str, role: Role) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE accounts SET role = ?1 WHERE account_id = ?2",
            params![role, account_id],
        )?;
        Ok(changed)
    }

    pub fn account_count(&self) -> LedgerResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(n)
    }
}
