//! Shared primitive types used across the ledger.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// A stable, unique identifier for any persisted entity (UUID v4 text).
pub type EntityId = String;

/// Identifier of an account row.
pub type AccountId = String;

/// All monetary amounts. Persisted as canonical decimal text.
pub type Money = Decimal;

/// Raised when a persisted enum column holds an unknown value.
#[derive(Error, Debug)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Fresh entity id.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// `a + b`, refusing amounts beyond the decimal range instead of panicking.
pub fn money_add(a: Money, b: Money) -> LedgerResult<Money> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::validation(format!("amount overflow adding {a} and {b}")))
}

/// `a * b`, refusing amounts beyond the decimal range instead of panicking.
pub fn money_mul(a: Money, b: Money) -> LedgerResult<Money> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::validation(format!("amount overflow multiplying {a} by {b}")))
}
