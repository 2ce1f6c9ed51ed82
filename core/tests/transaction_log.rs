//! Transaction log integration tests: deposit and withdrawal lifecycles,
//! idempotent transitions, and rejection of bad input without side effects.

use rust_decimal::Decimal;
use wallet_ledger_core::{
    account::{Account, BalanceOp},
    engine::LedgerEngine,
    error::{LedgerError, RejectionCode},
    event::LedgerEvent,
    ledger::{EntryLink, EntryStatus, LedgerEntryKind, NewEntry},
};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn setup() -> (LedgerEngine, Account) {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();
    (engine, a)
}

#[test]
fn deposit_credits_only_on_completion() {
    let (engine, a) = setup();
    let entry = engine.request_deposit(&a.account_id, d("250"), "card").unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);
    assert_eq!(entry.kind, LedgerEntryKind::Deposit);
    assert_eq!(entry.currency, "USD");
    assert!(entry.reference.as_deref().unwrap().starts_with("DEP-"));
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::ZERO);

    let t = engine.approve_entry(&entry.entry_id).unwrap();
    assert!(t.was_applied());
    assert_eq!(t.entry().status, EntryStatus::Completed);
    assert!(t.entry().resolved_at.is_some());
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("250"));
    assert_eq!(engine.store.entry_count(&a.account_id, LedgerEntryKind::Deposit).unwrap(), 1);
    assert_eq!(engine.store.entry_count(&a.account_id, LedgerEntryKind::Withdrawal).unwrap(), 0);
}

#[test]
fn completing_twice_mutates_once() {
    let (engine, a) = setup();
    let entry = engine.request_deposit(&a.account_id, d("100"), "card").unwrap();

    assert!(engine.approve_entry(&entry.entry_id).unwrap().was_applied());
    let again = engine.approve_entry(&entry.entry_id).unwrap();
    assert!(!again.was_applied());
    // A late rejection of a completed entry changes nothing either.
    let late = engine.reject_entry(&entry.entry_id).unwrap();
    assert!(!late.was_applied());
    assert_eq!(late.entry().status, EntryStatus::Completed);

    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("100"));
}

#[test]
fn payment_confirmation_by_reference_is_idempotent() {
    let (engine, a) = setup();
    let entry = engine.request_deposit(&a.account_id, d("75.25"), "crypto").unwrap();
    let reference = entry.reference.clone().unwrap();

    for _ in 0..3 {
        engine.confirm_payment(&reference, EntryStatus::Completed).unwrap();
    }
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("75.25"));

    let err = engine
        .confirm_payment("DEP-unknown", EntryStatus::Completed)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");
}

#[test]
fn pending_is_not_a_valid_transition_target() {
    let (engine, a) = setup();
    let entry = engine.request_deposit(&a.account_id, d("10"), "card").unwrap();
    let err = engine.ledger.transition(&entry.entry_id, EntryStatus::Pending).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn rejected_withdrawal_leaves_balance_unchanged() {
    let (engine, a) = setup();
    engine.accounts.adjust_balance(&a.account_id, d("300"), BalanceOp::Set).unwrap();

    let w = engine.request_withdrawal(&a.account_id, d("120"), "bank").unwrap();
    assert_eq!(w.status, EntryStatus::Pending);
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("300"));

    let t = engine.reject_entry(&w.entry_id).unwrap();
    assert!(t.was_applied());
    assert_eq!(t.entry().status, EntryStatus::Rejected);
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("300"));
}

#[test]
fn approved_withdrawal_debits() {
    let (engine, a) = setup();
    engine.accounts.adjust_balance(&a.account_id, d("300"), BalanceOp::Set).unwrap();
    let w = engine.request_withdrawal(&a.account_id, d("120"), "bank").unwrap();
    engine.approve_entry(&w.entry_id).unwrap();
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("180"));
}

#[test]
fn withdrawal_beyond_balance_is_refused() {
    let (engine, a) = setup();
    engine.accounts.adjust_balance(&a.account_id, d("50"), BalanceOp::Set).unwrap();

    let err = engine.request_withdrawal(&a.account_id, d("50.01"), "bank").unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }), "got {err:?}");
    assert_eq!(err.rejection().code, RejectionCode::InsufficientBalance);
    assert!(engine.entries(&a.account_id, Some(LedgerEntryKind::Withdrawal)).unwrap().is_empty());
}

#[test]
fn approval_rechecks_funds_spent_in_between() {
    let (engine, a) = setup();
    engine.accounts.adjust_balance(&a.account_id, d("100"), BalanceOp::Set).unwrap();
    let w = engine.request_withdrawal(&a.account_id, d("80"), "bank").unwrap();
    engine.open_investment(&a.account_id, "starter", d("60")).unwrap();

    let err = engine.approve_entry(&w.entry_id).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }), "got {err:?}");
    // Rolled back: still pending, balance untouched.
    assert_eq!(engine.ledger.get_entry(&w.entry_id).unwrap().status, EntryStatus::Pending);
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("40"));
}

#[test]
fn non_positive_amounts_are_rejected_without_side_effects() {
    let (engine, a) = setup();
    for amount in ["0", "-5"] {
        let err = engine.request_deposit(&a.account_id, d(amount), "card").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
        assert_eq!(err.rejection().code, RejectionCode::Validation);
    }
    assert!(engine.entries(&a.account_id, None).unwrap().is_empty());
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::ZERO);
}

#[test]
fn referral_entry_without_edge_is_rejected() {
    let (engine, a) = setup();
    let err = engine
        .ledger
        .append(NewEntry::completed(&a.account_id, LedgerEntryKind::Referral, d("5")))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = engine
        .ledger
        .append(
            NewEntry::completed(&a.account_id, LedgerEntryKind::Referral, d("5"))
                .linked(EntryLink::ReferralEdge("missing-edge".into())),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::ZERO);
}

#[test]
fn profit_entry_for_unknown_investment_is_not_found() {
    let (engine, a) = setup();
    let err = engine
        .ledger
        .append(
            NewEntry::completed(&a.account_id, LedgerEntryKind::Profit, d("5"))
                .linked(EntryLink::Investment("missing-investment".into())),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");
    assert_eq!(err.rejection().code, RejectionCode::NotFound);
    assert!(engine.entries(&a.account_id, None).unwrap().is_empty());
}

#[test]
fn deposit_above_the_configured_limit_is_rejected() {
    let (engine, a) = setup();
    let limit = engine.config.max_entry_amount;
    let err = engine
        .request_deposit(&a.account_id, limit + Decimal::ONE, "card")
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert!(engine.entries(&a.account_id, None).unwrap().is_empty());

    let at_limit = engine.request_deposit(&a.account_id, limit, "card").unwrap();
    assert_eq!(at_limit.amount, limit);
}

#[test]
fn completion_that_would_overflow_the_wallet_is_refused() {
    let (engine, a) = setup();
    engine
        .accounts
        .adjust_balance(&a.account_id, Decimal::MAX, BalanceOp::Set)
        .unwrap();
    let entry = engine.request_deposit(&a.account_id, d("10"), "card").unwrap();

    let err = engine
        .confirm_payment(entry.reference.as_deref().unwrap(), EntryStatus::Completed)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::MAX);
    assert_eq!(
        engine.ledger.get_entry(&entry.entry_id).unwrap().status,
        EntryStatus::Pending
    );
}

#[test]
fn deactivated_account_cannot_request_deposits() {
    let (engine, a) = setup();
    engine.accounts.set_active(&a.account_id, false).unwrap();
    let err = engine.request_deposit(&a.account_id, d("10"), "card").unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn lifecycle_is_recorded_in_the_outbox() {
    let (engine, a) = setup();
    let entry = engine.request_deposit(&a.account_id, d("40"), "card").unwrap();
    engine.approve_entry(&entry.entry_id).unwrap();

    let events = engine.events_for_account(&a.account_id).unwrap();
    let names: Vec<&str> = events.iter().map(LedgerEvent::type_name).collect();
    assert_eq!(names, vec!["account_registered", "entry_requested", "entry_completed"]);
}
