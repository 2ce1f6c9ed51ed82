//! Ledger configuration, loaded from JSON files under a data directory.
//!
//! Layout:
//!   {data_dir}/ledger.json              currency, referral, sweep, store, hashing
//!   {data_dir}/plans/plan_catalog.json  investment plans (seeded into `plans`)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Longest plan term accepted: one hundred years.
pub const MAX_PLAN_DURATION_SECS: i64 = 100 * 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub plan_id: String,
    pub name: String,
    /// Profit as a multiple of principal (4 → 400% return).
    pub return_multiplier: Decimal,
    pub min_deposit: Decimal,
    pub max_deposit: Decimal,
    pub duration_secs: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PlanCatalogFile {
    plans: Vec<PlanConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferralConfig {
    /// Pay each upline edge its rate on every completed deposit.
    #[serde(default = "default_true")]
    pub pay_on_deposit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturationConfig {
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    /// Attempts per transaction before surfacing ConcurrencyConflict.
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct LedgerFile {
    currency: String,
    #[serde(default = "default_max_entry_amount")]
    max_entry_amount: Decimal,
    referral: ReferralConfig,
    maturation: MaturationConfig,
    store: StoreConfig,
    password_hash: PasswordHashConfig,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub currency: String,
    /// Largest single deposit or withdrawal request.
    pub max_entry_amount: Decimal,
    pub referral: ReferralConfig,
    pub maturation: MaturationConfig,
    pub store: StoreConfig,
    pub password_hash: PasswordHashConfig,
    pub plans: HashMap<String, PlanConfig>,
}

impl LedgerConfig {
    /// Load from the data/ directory.
    /// In tests, use LedgerConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let ledger_path = format!("{data_dir}/ledger.json");
        let ledger_content = std::fs::read_to_string(&ledger_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {ledger_path}: {e}"))?;
        let file: LedgerFile = serde_json::from_str(&ledger_content)?;

        let plan_path = format!("{data_dir}/plans/plan_catalog.json");
        let plan_content = std::fs::read_to_string(&plan_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {plan_path}: {e}"))?;
        let plan_file: PlanCatalogFile = serde_json::from_str(&plan_content)?;
        let plans = plan_file
            .plans
            .into_iter()
            .map(|p| (p.plan_id.clone(), p))
            .collect();

        let config = Self {
            currency: file.currency,
            max_entry_amount: file.max_entry_amount,
            referral: file.referral,
            maturation: file.maturation,
            store: file.store,
            password_hash: file.password_hash,
            plans,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break ledger invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_entry_amount <= Decimal::ZERO {
            anyhow::bail!("max_entry_amount must be positive, got {}", self.max_entry_amount);
        }
        for plan in self.plans.values() {
            if plan.min_deposit <= Decimal::ZERO || plan.min_deposit > plan.max_deposit {
                anyhow::bail!(
                    "plan {}: deposit bounds [{}, {}] are invalid",
                    plan.plan_id,
                    plan.min_deposit,
                    plan.max_deposit
                );
            }
            if plan.duration_secs <= 0 || plan.return_multiplier.is_sign_negative() {
                anyhow::bail!("plan {}: duration and multiplier must be positive", plan.plan_id);
            }
            if plan.duration_secs > MAX_PLAN_DURATION_SECS {
                anyhow::bail!(
                    "plan {}: duration {}s exceeds the {}s limit",
                    plan.plan_id,
                    plan.duration_secs,
                    MAX_PLAN_DURATION_SECS
                );
            }
        }
        if self.store.retry_budget == 0 {
            anyhow::bail!("store.retry_budget must be at least 1");
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let plan = PlanConfig {
            plan_id: "starter".into(),
            name: "Starter".into(),
            return_multiplier: Decimal::from(4),
            min_deposit: Decimal::from(50),
            max_deposit: Decimal::from(1000),
            duration_secs: 7 * 24 * 3600,
            active: true,
        };
        Self {
            currency: "USD".into(),
            max_entry_amount: default_max_entry_amount(),
            referral: ReferralConfig {
                pay_on_deposit: true,
            },
            maturation: MaturationConfig {
                sweep_interval_secs: 60,
            },
            store: StoreConfig {
                busy_timeout_ms: 5_000,
                retry_budget: 8,
                retry_backoff_ms: 5,
            },
            // Cheapest legal Argon2 parameters; tests hash many passwords.
            password_hash: PasswordHashConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            plans: HashMap::from([(plan.plan_id.clone(), plan)]),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entry_amount() -> Decimal {
    Decimal::from(1_000_000_000)
}
