use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient balance on account {account_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        account_id: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrency conflict: gave up after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for SQLite lock contention, which the store retries.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Structured reason for the API layer. Infrastructure failures map to
    /// `internal` so no storage detail leaks across the boundary.
    pub fn rejection(&self) -> RejectionReason {
        let code = match self {
            Self::Validation(_) => RejectionCode::Validation,
            Self::InsufficientBalance { .. } => RejectionCode::InsufficientBalance,
            Self::NotFound { .. } => RejectionCode::NotFound,
            Self::ConcurrencyConflict { .. } => RejectionCode::ConcurrencyConflict,
            _ => RejectionCode::Internal,
        };
        let message = match code {
            RejectionCode::Internal => "internal error".to_string(),
            _ => self.to_string(),
        };
        RejectionReason { code, message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    Validation,
    InsufficientBalance,
    NotFound,
    ConcurrencyConflict,
    Internal,
}

/// What the transport layer receives when an operation is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionReason {
    pub code: RejectionCode,
    pub message: String,
}
