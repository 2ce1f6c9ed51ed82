//! Wallet balance integration tests: non-negativity and lost-update safety.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use wallet_ledger_core::{
    account::{AccountStore, BalanceOp, Role},
    clock::{ManualClock, SystemClock},
    config::LedgerConfig,
    engine::LedgerEngine,
    error::LedgerError,
    investment::InvestmentStatus,
    maturation::SweepOutcome,
    store::LedgerStore,
};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[test]
fn new_account_starts_at_zero() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();
    assert_eq!(a.wallet_balance, Decimal::ZERO);
    assert!(a.active);
}

#[test]
fn subtract_past_zero_clamps_instead_of_going_negative() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();

    engine.accounts.adjust_balance(&a.account_id, d("30"), BalanceOp::Add).unwrap();
    let after = engine
        .accounts
        .adjust_balance(&a.account_id, d("45.50"), BalanceOp::Subtract)
        .unwrap();
    assert_eq!(after.wallet_balance, Decimal::ZERO);
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::ZERO);
}

#[test]
fn set_overwrites_and_negative_amounts_are_refused() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();

    let set = engine.accounts.adjust_balance(&a.account_id, d("12.34"), BalanceOp::Set).unwrap();
    assert_eq!(set.wallet_balance, d("12.34"));

    let err = engine
        .accounts
        .adjust_balance(&a.account_id, d("-1"), BalanceOp::Add)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("12.34"));
}

#[test]
fn unknown_account_is_not_found() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let err = engine
        .accounts
        .adjust_balance("nope", d("1"), BalanceOp::Add)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");
}

#[test]
fn credit_past_decimal_range_is_refused_and_balance_kept() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();
    engine
        .accounts
        .adjust_balance(&a.account_id, Decimal::MAX, BalanceOp::Set)
        .unwrap();

    let err = engine
        .accounts
        .adjust_balance(&a.account_id, Decimal::ONE, BalanceOp::Add)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, Decimal::MAX);
}

#[test]
fn accounts_resolve_by_username_and_roles_change() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();
    assert_eq!(a.role, Role::User);

    let found = engine.accounts.find_by_username("alice").unwrap().unwrap();
    assert_eq!(found.account_id, a.account_id);
    assert!(engine.accounts.find_by_username("mallory").unwrap().is_none());

    let promoted = engine.accounts.set_role(&a.account_id, Role::Admin).unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert_eq!(engine.get_account(&a.account_id).unwrap().role, Role::Admin);

    let err = engine.accounts.set_role("nope", Role::Admin).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");
}

/// Two threads hammering one wallet through separate connections must not
/// lose an update.
#[test]
fn concurrent_credits_are_not_lost() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = std::env::temp_dir().join(format!("ledger-concurrency-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();

    let config = LedgerConfig::default_test();
    let store = LedgerStore::open(&path_str, &config.store).unwrap();
    let engine = LedgerEngine::build(&store, config, Arc::new(SystemClock)).unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", None)
        .unwrap();

    const THREADS: usize = 4;
    const CREDITS: usize = 25;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.reopen().unwrap();
            let account_id = a.account_id.clone();
            std::thread::spawn(move || {
                let worker = AccountStore::new(store);
                for _ in 0..CREDITS {
                    worker
                        .adjust_balance(&account_id, Decimal::ONE, BalanceOp::Add)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let balance = engine.get_account(&a.account_id).unwrap().wallet_balance;
    assert_eq!(balance, Decimal::from(THREADS * CREDITS));

    drop(engine);
    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}

/// A maturation sweep on one engine and withdrawal approvals on another
/// engine, racing over the same wallets, must both land in full.
#[test]
fn sweep_and_approvals_on_separate_engines_lose_no_update() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = std::env::temp_dir().join(format!("ledger-sweep-race-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();

    let config = LedgerConfig::default_test();
    let clock = ManualClock::new(Utc::now());
    let store = LedgerStore::open(&path_str, &config.store).unwrap();
    let sweeper = LedgerEngine::build(&store, config.clone(), Arc::new(clock.clone())).unwrap();
    let approver = LedgerEngine::build(&store, config, Arc::new(clock.clone())).unwrap();

    const ACCOUNTS: usize = 8;
    let mut account_ids = Vec::new();
    let mut withdrawals = Vec::new();
    for i in 0..ACCOUNTS {
        let name = format!("holder{i}");
        let a = sweeper
            .register_account(&name, &format!("{name}@example.com"), "hunter2hunter2", None)
            .unwrap();
        sweeper
            .accounts
            .adjust_balance(&a.account_id, d("1000"), BalanceOp::Set)
            .unwrap();
        sweeper.open_investment(&a.account_id, "starter", d("100")).unwrap();
        let w = sweeper.request_withdrawal(&a.account_id, d("300"), "bank").unwrap();
        withdrawals.push(w.entry_id);
        account_ids.push(a.account_id);
    }
    clock.advance(Duration::days(8));

    let approvals = std::thread::spawn(move || {
        for entry_id in &withdrawals {
            assert!(approver.approve_entry(entry_id).unwrap().was_applied());
        }
    });
    let report = match sweeper.sweep_now().unwrap() {
        SweepOutcome::Ran(report) => report,
        SweepOutcome::Skipped => panic!("sweep unexpectedly skipped"),
    };
    approvals.join().unwrap();

    assert_eq!(report.matured, ACCOUNTS);
    assert!(report.failed.is_empty());
    for id in &account_ids {
        // 1000 - 100 invested - 300 withdrawn + 500 returned
        assert_eq!(sweeper.get_account(id).unwrap().wallet_balance, d("1100"));
    }
    assert_eq!(
        sweeper.store.investment_count(InvestmentStatus::Completed).unwrap(),
        ACCOUNTS as i64
    );

    drop(sweeper);
    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}
