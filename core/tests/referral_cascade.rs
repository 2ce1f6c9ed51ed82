//! Referral integration tests: edge fan-out on registration, the depth
//! bound, commission payment on deposits, and the downline tree.

use rust_decimal::Decimal;
use wallet_ledger_core::{
    account::Account,
    engine::LedgerEngine,
    error::LedgerError,
    ledger::{EntryStatus, LedgerEntryKind},
    referral::MAX_REFERRAL_DEPTH,
};

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn register(engine: &LedgerEngine, name: &str, referrer: Option<&Account>) -> Account {
    engine
        .register_account(
            name,
            &format!("{name}@example.com"),
            "hunter2hunter2",
            referrer.map(|r| r.referral_code.as_str()),
        )
        .unwrap()
}

/// Registers a straight chain: each account referred by the previous one.
fn chain(engine: &LedgerEngine, len: usize) -> Vec<Account> {
    let mut accounts: Vec<Account> = Vec::new();
    for i in 0..len {
        let next = register(engine, &format!("user{i}"), accounts.last());
        accounts.push(next);
    }
    accounts
}

fn deposit(engine: &LedgerEngine, account: &Account, amount: &str) {
    let entry = engine.request_deposit(&account.account_id, d(amount), "card").unwrap();
    engine
        .confirm_payment(entry.reference.as_deref().unwrap(), EntryStatus::Completed)
        .unwrap();
}

#[test]
fn registration_materializes_one_edge_per_ancestor() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 4); // A <- B <- C <- D
    let (a, b, c, dd) = (&accts[0], &accts[1], &accts[2], &accts[3]);
    assert_eq!(dd.referred_by.as_deref(), Some(c.account_id.as_str()));

    let upline = engine.referrals.upline(&dd.account_id).unwrap();
    let mut got: Vec<(String, u8, Decimal)> = upline
        .iter()
        .map(|e| (e.referrer_id.clone(), e.level, e.commission_rate))
        .collect();
    got.sort_by_key(|(_, level, _)| *level);
    assert_eq!(
        got,
        vec![
            (c.account_id.clone(), 1, d("0.10")),
            (b.account_id.clone(), 2, d("0.05")),
            (a.account_id.clone(), 3, d("0.03")),
        ]
    );
    assert!(upline.iter().all(|e| e.commission_amount == Decimal::ZERO));

    // A earns on three descendants, one per level.
    for level in 1..=3u8 {
        assert_eq!(engine.referrals.get_edges(&a.account_id, Some(level)).unwrap().len(), 1);
    }
    assert!(engine.referrals.get_edges(&a.account_id, Some(4)).unwrap().is_empty());
}

#[test]
fn no_edge_beyond_fifth_level() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 7);
    let newest = accts.last().unwrap();

    let upline = engine.referrals.upline(&newest.account_id).unwrap();
    assert_eq!(upline.len(), MAX_REFERRAL_DEPTH as usize);
    assert!(upline.iter().all(|e| e.level <= MAX_REFERRAL_DEPTH));
    // The chain root is six generations up and gets nothing.
    assert!(upline.iter().all(|e| e.referrer_id != accts[0].account_id));

    assert!(engine.referrals.get_edges(&accts[0].account_id, Some(6)).is_err());
}

#[test]
fn unknown_referral_code_registers_without_referrer() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let a = engine
        .register_account("alice", "alice@example.com", "hunter2hunter2", Some("NOSUCHCODE"))
        .unwrap();
    assert!(a.referred_by.is_none());
    assert!(engine.referrals.upline(&a.account_id).unwrap().is_empty());
}

#[test]
fn completed_deposit_pays_every_upline_level() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 4);
    let (a, b, c, dd) = (&accts[0], &accts[1], &accts[2], &accts[3]);

    deposit(&engine, dd, "200");

    assert_eq!(engine.get_account(&dd.account_id).unwrap().wallet_balance, d("200"));
    assert_eq!(engine.get_account(&c.account_id).unwrap().wallet_balance, d("20"));
    assert_eq!(engine.get_account(&b.account_id).unwrap().wallet_balance, d("10"));
    assert_eq!(engine.get_account(&a.account_id).unwrap().wallet_balance, d("6"));

    // Each payout accretes onto its edge and is logged as a referral entry.
    let a_edge = &engine.referrals.get_edges(&a.account_id, Some(3)).unwrap()[0];
    assert_eq!(a_edge.commission_amount, d("6"));
    let a_entries = engine.entries(&a.account_id, Some(LedgerEntryKind::Referral)).unwrap();
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].status, EntryStatus::Completed);

    deposit(&engine, dd, "100");
    let a_edge = &engine.referrals.get_edges(&a.account_id, Some(3)).unwrap()[0];
    assert_eq!(a_edge.commission_amount, d("9"));
    assert_eq!(engine.dashboard_stats(&a.account_id).unwrap().referral_earnings, d("9"));
}

#[test]
fn rejected_deposit_pays_no_commission() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 2);
    let entry = engine.request_deposit(&accts[1].account_id, d("500"), "card").unwrap();
    engine.reject_entry(&entry.entry_id).unwrap();

    assert_eq!(engine.get_account(&accts[0].account_id).unwrap().wallet_balance, Decimal::ZERO);
    assert!(engine
        .entries(&accts[0].account_id, Some(LedgerEntryKind::Referral))
        .unwrap()
        .is_empty());
}

#[test]
fn deactivated_referrer_is_skipped() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 3);
    engine.accounts.set_active(&accts[1].account_id, false).unwrap();

    deposit(&engine, &accts[2], "100");
    assert_eq!(engine.get_account(&accts[1].account_id).unwrap().wallet_balance, Decimal::ZERO);
    assert_eq!(engine.get_account(&accts[0].account_id).unwrap().wallet_balance, d("5"));
}

#[test]
fn referral_tree_nests_downline_by_generation() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let root = register(&engine, "root", None);
    let left = register(&engine, "left", Some(&root));
    let right = register(&engine, "right", Some(&root));
    let grandchild = register(&engine, "grandchild", Some(&left));

    let tree = engine.referral_tree(&root.account_id).unwrap();
    assert_eq!(tree.len(), 2);
    let left_node = tree.iter().find(|n| n.edge.referred_id == left.account_id).unwrap();
    let right_node = tree.iter().find(|n| n.edge.referred_id == right.account_id).unwrap();
    assert_eq!(left_node.username, "left");
    assert_eq!(left_node.children.len(), 1);
    assert_eq!(left_node.children[0].edge.referred_id, grandchild.account_id);
    assert_eq!(left_node.children[0].edge.level, 2);
    assert!(right_node.children.is_empty());

    assert_eq!(engine.dashboard_stats(&root.account_id).unwrap().referral_count, 2);
}

#[test]
fn commission_events_notify_the_referrer() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 2);
    deposit(&engine, &accts[1], "50");

    let names: Vec<&str> = engine
        .events_for_account(&accts[0].account_id)
        .unwrap()
        .iter()
        .map(|e| e.type_name())
        .collect();
    assert!(names.contains(&"referral_edge_created"));
    assert!(names.contains(&"commission_paid"));
}

#[test]
fn cascade_runs_once_for_an_existing_account() {
    let (engine, _clock) = LedgerEngine::build_test().unwrap();
    let accts = chain(&engine, 3); // A <- B <- C
    let late = register(&engine, "late", None);
    assert!(engine.referrals.upline(&late.account_id).unwrap().is_empty());

    let edges = engine
        .referrals
        .on_register(&late.account_id, Some(&accts[2].account_id))
        .unwrap();
    let mut levels: Vec<(String, u8)> = edges.iter().map(|e| (e.referrer_id.clone(), e.level)).collect();
    levels.sort_by_key(|(_, level)| *level);
    assert_eq!(
        levels,
        vec![
            (accts[2].account_id.clone(), 1),
            (accts[1].account_id.clone(), 2),
            (accts[0].account_id.clone(), 3),
        ]
    );

    let err = engine
        .referrals
        .on_register(&late.account_id, Some(&accts[0].account_id))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert_eq!(engine.referrals.upline(&late.account_id).unwrap().len(), 3);

    let err = engine.referrals.on_register("ghost", None).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }), "got {err:?}");

    deposit(&engine, &late, "100");
    assert_eq!(engine.get_account(&accts[2].account_id).unwrap().wallet_balance, d("10"));
}
