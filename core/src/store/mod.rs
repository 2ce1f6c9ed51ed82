//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Services call store methods; they never execute SQL directly.
//!
//! Every service owns its own `LedgerStore` (one connection each, see
//! `reopen`). Mutations run inside `atomic`, which opens a
//! `BEGIN IMMEDIATE` transaction: SQLite admits one writer at a time, so
//! two mutators of the same account are serialized and cannot lose an
//! update. Lock contention is retried up to the configured budget.

mod account;
mod event;
mod investment;
mod ledger;
mod plan;
mod referral;

pub use referral::DownlineMember;

use crate::{
    account::Role,
    config::StoreConfig,
    error::{LedgerError, LedgerResult},
    investment::InvestmentStatus,
    ledger::{EntryStatus, LedgerEntryKind},
    types::{from_millis, money_add, ParseEnumError},
};
use chrono::{DateTime, Utc};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef},
    Connection, OpenFlags, Row, ToSql, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;
use std::{str::FromStr, time::Duration};

pub struct LedgerStore {
    conn: Connection,
    path: String,
    config: StoreConfig,
}

impl LedgerStore {
    pub fn open(path: &str, config: &StoreConfig) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self {
            conn,
            path: path.to_string(),
            config: config.clone(),
        })
    }

    /// Open a private in-memory database.
    /// Uses a uniquely named `memdb` URI so `reopen()` reaches the same data
    /// with ordinary file locking (busy timeouts apply, unlike shared-cache
    /// table locks). The database lives as long as any of its connections.
    pub fn in_memory(config: &StoreConfig) -> LedgerResult<Self> {
        let uri = format!("file:/ledger-{}?vfs=memdb", uuid::Uuid::new_v4());
        Self::open(&uri, config)
    }

    /// Open another connection to the same database.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Self::open(&self.path, &self.config)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_accounts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_event_log.sql"))?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────

    /// Run `f` inside a write transaction (`BEGIN IMMEDIATE`).
    ///
    /// `f` receives this store; every store call it makes joins the open
    /// transaction. Any error rolls the whole unit back. Busy/locked errors
    /// are retried with linear backoff; once the budget is spent the caller
    /// gets `ConcurrencyConflict`. Must not be nested.
    pub fn atomic<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnMut(&Self) -> LedgerResult<T>,
    {
        self.with_retry(TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a read transaction, giving it a consistent view
    /// across several queries.
    pub fn snapshot<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnMut(&Self) -> LedgerResult<T>,
    {
        self.with_retry(TransactionBehavior::Deferred, f)
    }

    fn with_retry<T, F>(&self, behavior: TransactionBehavior, mut f: F) -> LedgerResult<T>
    where
        F: FnMut(&Self) -> LedgerResult<T>,
    {
        debug_assert!(self.conn.is_autocommit(), "nested store transaction");
        let budget = self.config.retry_budget.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(behavior, &mut f) {
                Err(e) if e.is_busy() && attempt < budget => {
                    log::debug!("store busy on attempt {attempt}/{budget}: {e}");
                    std::thread::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ));
                }
                Err(e) if e.is_busy() => {
                    log::warn!("store still busy after {attempt} attempts: {e}");
                    return Err(LedgerError::ConcurrencyConflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    fn run_once<T, F>(&self, behavior: TransactionBehavior, f: &mut F) -> LedgerResult<T>
    where
        F: FnMut(&Self) -> LedgerResult<T>,
    {
        let tx = Transaction::new_unchecked(&self.conn, behavior)?;
        // Dropping `tx` on the error path rolls back.
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}

// ── Column helpers ─────────────────────────────────────────────

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => Decimal::from_str(&text)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub(crate) fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

pub(crate) fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => from_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

/// Sum decimal amounts exactly. SQLite's SUM would go through REAL.
pub(crate) fn sum_decimals(values: impl IntoIterator<Item = Decimal>) -> LedgerResult<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, money_add)
}

// Enums are stored as their snake_case names.
macro_rules! sql_text_enum {
    ($($ty:ty),* $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    )*};
}

sql_text_enum!(Role, LedgerEntryKind, EntryStatus, InvestmentStatus);
