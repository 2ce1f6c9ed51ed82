//! Wallet ledger and investment-lifecycle engine.
//!
//! One mutable balance per account, an append-only transaction log that
//! drives every balance change, a five-level referral commission cascade,
//! and a background maturation sweep, all persisted in SQLite.

pub mod account;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod event;
pub mod investment;
pub mod ledger;
pub mod maturation;
pub mod referral;
pub mod registration;
pub mod store;
pub mod types;
