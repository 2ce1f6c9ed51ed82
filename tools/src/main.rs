//! ledger-runner: headless driver for the wallet ledger.
//!
//! Usage:
//!   ledger-runner --demo
//!   ledger-runner --db ledger.db --data-dir ./data --ipc-mode
//!
//! In IPC mode each stdin line is one JSON command; each reply is one JSON
//! line on stdout. Refused operations reply `{"error": {code, message}}`.

use anyhow::Result;
use chrono::Duration;
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use wallet_ledger_core::{
    clock::SystemClock,
    config::LedgerConfig,
    engine::LedgerEngine,
    error::LedgerResult,
    ledger::EntryStatus,
    store::LedgerStore,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Register {
        username: String,
        email: String,
        password: String,
        #[serde(default)]
        referral_code: Option<String>,
    },
    Deposit {
        account_id: String,
        amount: Decimal,
        #[serde(default = "default_method")]
        method: String,
    },
    Withdraw {
        account_id: String,
        amount: Decimal,
        #[serde(default = "default_method")]
        method: String,
    },
    Confirm {
        reference: String,
        status: EntryStatus,
    },
    Approve {
        entry_id: String,
    },
    Reject {
        entry_id: String,
    },
    Invest {
        account_id: String,
        plan_id: String,
        amount: Decimal,
    },
    Stats {
        account_id: String,
    },
    Tree {
        account_id: String,
    },
    Events {
        account_id: String,
    },
    Sweep,
    Quit,
}

fn default_method() -> String {
    "manual".to_string()
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let demo = args.iter().any(|a| a == "--demo");
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");

    if demo {
        return run_demo();
    }

    let config = LedgerConfig::load(data_dir)?;
    let store = if db == ":memory:" {
        LedgerStore::in_memory(&config.store)?
    } else {
        LedgerStore::open(db, &config.store)?
    };
    let mut engine = LedgerEngine::build(&store, config, Arc::new(SystemClock))?;
    engine.start_maturation()?;

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        println!("Wallet ledger: ledger-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  plans:     {}", engine.config.plans.len());
        println!("Pass --ipc-mode to accept commands on stdin, or --demo.");
    }

    engine.stop_maturation();
    Ok(())
}

fn run_ipc_loop(engine: &LedgerEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if handle.read_line(&mut buffer)? == 0 {
            break;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("command refused: {e}");
                serde_json::json!({ "error": e.rejection() })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &LedgerEngine, cmd: IpcCommand) -> LedgerResult<serde_json::Value> {
    let value = match cmd {
        IpcCommand::Register {
            username,
            email,
            password,
            referral_code,
        } => serde_json::to_value(engine.register_account(
            &username,
            &email,
            &password,
            referral_code.as_deref(),
        )?)?,
        IpcCommand::Deposit {
            account_id,
            amount,
            method,
        } => serde_json::to_value(engine.request_deposit(&account_id, amount, &method)?)?,
        IpcCommand::Withdraw {
            account_id,
            amount,
            method,
        } => serde_json::to_value(engine.request_withdrawal(&account_id, amount, &method)?)?,
        IpcCommand::Confirm { reference, status } => {
            let t = engine.confirm_payment(&reference, status)?;
            serde_json::json!({ "applied": t.was_applied(), "entry": t.entry() })
        }
        IpcCommand::Approve { entry_id } => {
            let t = engine.approve_entry(&entry_id)?;
            serde_json::json!({ "applied": t.was_applied(), "entry": t.entry() })
        }
        IpcCommand::Reject { entry_id } => {
            let t = engine.reject_entry(&entry_id)?;
            serde_json::json!({ "applied": t.was_applied(), "entry": t.entry() })
        }
        IpcCommand::Invest {
            account_id,
            plan_id,
            amount,
        } => serde_json::to_value(engine.open_investment(&account_id, &plan_id, amount)?)?,
        IpcCommand::Stats { account_id } => serde_json::to_value(engine.dashboard_stats(&account_id)?)?,
        IpcCommand::Tree { account_id } => serde_json::to_value(engine.referral_tree(&account_id)?)?,
        IpcCommand::Events { account_id } => {
            serde_json::to_value(engine.events_for_account(&account_id)?)?
        }
        IpcCommand::Sweep => serde_json::to_value(engine.sweep_now()?)?,
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

/// Scripted walk through the whole lifecycle on an in-memory ledger with a
/// manual clock: a three-level referral chain, a deposit, an investment,
/// and its maturation.
fn run_demo() -> Result<()> {
    let (engine, clock) = LedgerEngine::build_test()?;

    let alice = engine.register_account("alice", "alice@example.com", "correct-horse", None)?;
    let bob = engine.register_account("bob", "bob@example.com", "correct-horse", Some(&alice.referral_code))?;
    let carol = engine.register_account("carol", "carol@example.com", "correct-horse", Some(&bob.referral_code))?;

    let deposit = engine.request_deposit(&carol.account_id, Decimal::new(500, 0), "card")?;
    if let Some(reference) = deposit.reference.as_deref() {
        engine.confirm_payment(reference, EntryStatus::Completed)?;
    }

    let plan_id = engine
        .investments
        .plans(true)?
        .first()
        .map(|p| p.plan_id.clone())
        .ok_or_else(|| anyhow::anyhow!("no active plan configured"))?;
    let investment = engine.open_investment(&carol.account_id, &plan_id, Decimal::new(100, 0))?;
    let term = engine.investments.get_plan(&plan_id)?.term()?;
    clock.advance(term + Duration::seconds(1));
    engine.sweep_now()?;
    let matured = engine.investments.get(&investment.investment_id)?;

    println!("=== DEMO SUMMARY ===");
    println!("  plan:        {plan_id}");
    println!("  investment:  {} ({:?})", matured.investment_id, matured.status);
    for account in [&alice, &bob, &carol] {
        let stats = engine.dashboard_stats(&account.account_id)?;
        println!(
            "  {:<6} balance {:>10} | invested {:>8} | earnings {:>8} | referral {:>8} | direct refs {}",
            account.username,
            stats.wallet_balance,
            stats.total_invested,
            stats.total_earnings,
            stats.referral_earnings,
            stats.referral_count
        );
    }
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
