//! Maturation Processor: promotes expired investments and pays them out.
//!
//! A sweep scans for active investments whose term has ended and enqueues
//! one `MaturationJob` per investment into a queue deduplicated on
//! (investment id, target status). The worker handles each job in its own
//! store transaction: re-read, credit principal + profit, flip the status,
//! append the profit entry, record the notification. The status flip is
//! conditional on `status = 'active'`, so a job delivered twice pays once.
//!
//! A failed job is logged and dropped; the investment is still active, so
//! the next sweep's scan re-enqueues it.
//!
//! Sweeps are single-flight: `MaturationScheduler::run_once` skips if a
//! sweep is already in progress.

use crate::{
    account::credit_in,
    clock::Clock,
    error::{LedgerError, LedgerResult},
    event::{record_in, LedgerEvent},
    investment::{Investment, InvestmentStatus},
    ledger::{append_in, EntryLink, LedgerEntryKind, NewEntry, PostingRules},
    store::LedgerStore,
    types::{money_add, EntityId, Money},
};
use serde::Serialize;
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, TryLockError,
    },
    thread::JoinHandle,
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaturationJob {
    pub investment_id: EntityId,
    pub target: InvestmentStatus,
}

impl MaturationJob {
    pub fn complete(investment_id: EntityId) -> Self {
        Self {
            investment_id,
            target: InvestmentStatus::Completed,
        }
    }

    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.investment_id, self.target.as_str())
    }
}

/// FIFO of jobs; a key already queued is not queued again.
#[derive(Debug, Default)]
pub struct WorkQueue {
    jobs: VecDeque<MaturationJob>,
    queued: HashSet<String>,
}

impl WorkQueue {
    /// Returns false when an identical job is already waiting.
    pub fn push(&mut self, job: MaturationJob) -> bool {
        if !self.queued.insert(job.dedup_key()) {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    pub fn pop(&mut self) -> Option<MaturationJob> {
        let job = self.jobs.pop_front()?;
        self.queued.remove(&job.dedup_key());
        Some(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Matured {
        investment_id: EntityId,
        total_return: Money,
    },
    /// Someone else completed it first.
    AlreadyCompleted,
    NotYetDue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub matured: usize,
    pub skipped: usize,
    pub failed: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Ran(SweepReport),
    /// A sweep was already running.
    Skipped,
}

pub struct MaturationProcessor {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    rules: PostingRules,
    queue: WorkQueue,
}

impl MaturationProcessor {
    pub fn new(store: LedgerStore, clock: Arc<dyn Clock>, rules: PostingRules) -> Self {
        Self {
            store,
            clock,
            rules,
            queue: WorkQueue::default(),
        }
    }

    /// Enqueue every due investment.
    pub fn scan(&mut self) -> LedgerResult<usize> {
        let due = self.store.due_investment_ids(self.clock.now())?;
        let n = due.len();
        for id in due {
            self.queue.push(MaturationJob::complete(id));
        }
        Ok(n)
    }

    /// Scan, then drain the queue. Per-job failures never abort the sweep.
    pub fn sweep(&mut self) -> LedgerResult<SweepReport> {
        let mut report = SweepReport {
            scanned: self.scan()?,
            ..SweepReport::default()
        };

        while let Some(job) = self.queue.pop() {
            match self.process(&job) {
                Ok(JobOutcome::Matured { .. }) => report.matured += 1,
                Ok(JobOutcome::AlreadyCompleted | JobOutcome::NotYetDue) => report.skipped += 1,
                Err(e) => {
                    log::warn!(
                        "maturation of investment {} failed, retrying next sweep: {e}",
                        job.investment_id
                    );
                    report.failed.push(job.investment_id);
                }
            }
        }

        if report.scanned > 0 {
            log::info!(
                "maturation sweep: scanned={} matured={} skipped={} failed={}",
                report.scanned,
                report.matured,
                report.skipped,
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Handle one job. Idempotent.
    pub fn process(&self, job: &MaturationJob) -> LedgerResult<JobOutcome> {
        let now = self.clock.now();
        self.store.atomic(|tx| {
            let inv = tx
                .get_investment(&job.investment_id)?
                .ok_or_else(|| LedgerError::not_found("investment", &job.investment_id))?;
            if inv.status == job.target {
                return Ok(JobOutcome::AlreadyCompleted);
            }
            if inv.end_at > now {
                return Ok(JobOutcome::NotYetDue);
            }
            mature_in(tx, &inv, &self.rules, now)
        })
    }
}

fn mature_in(
    tx: &LedgerStore,
    inv: &Investment,
    rules: &PostingRules,
    now: chrono::DateTime<chrono::Utc>,
) -> LedgerResult<JobOutcome> {
    let profit = inv.profit_due()?;
    let total_return = money_add(inv.amount, profit)?;

    if tx.complete_investment(&inv.investment_id, profit, now)? == 0 {
        return Ok(JobOutcome::AlreadyCompleted);
    }
    credit_in(tx, &inv.account_id, total_return)?;
    append_in(
        tx,
        NewEntry::completed(&inv.account_id, LedgerEntryKind::Profit, total_return)
            .linked(EntryLink::Investment(inv.investment_id.clone())),
        rules,
        now,
    )?;
    record_in(
        tx,
        &LedgerEvent::InvestmentMatured {
            investment_id: inv.investment_id.clone(),
            account_id: inv.account_id.clone(),
            principal: inv.amount,
            profit,
            total_return,
        },
        now,
    )?;
    log::debug!(
        "investment {} matured: {} credited to {}",
        inv.investment_id,
        total_return,
        inv.account_id
    );
    Ok(JobOutcome::Matured {
        investment_id: inv.investment_id.clone(),
        total_return,
    })
}

/// Owns the processor and its background thread.
pub struct MaturationScheduler {
    processor: Arc<Mutex<MaturationProcessor>>,
    worker: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl MaturationScheduler {
    pub fn new(processor: MaturationProcessor) -> Self {
        Self {
            processor: Arc::new(Mutex::new(processor)),
            worker: None,
        }
    }

    /// One sweep, unless one is already running.
    pub fn run_once(&self) -> LedgerResult<SweepOutcome> {
        run_single_flight(&self.processor)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start sweeping every `interval` on a background thread.
    pub fn start(&mut self, interval: Duration) -> LedgerResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let processor = Arc::clone(&self.processor);
        let handle = std::thread::Builder::new()
            .name("maturation-sweep".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match run_single_flight(&processor) {
                        Ok(SweepOutcome::Skipped) => {
                            log::debug!("maturation tick skipped: previous sweep still running")
                        }
                        Ok(SweepOutcome::Ran(_)) => {}
                        Err(e) => log::warn!("maturation sweep failed: {e}"),
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| anyhow::anyhow!("cannot spawn maturation thread: {e}"))?;
        log::info!("maturation sweep started, interval {interval:?}");
        self.worker = Some((stop_tx, handle));
        Ok(())
    }

    /// Stop the background thread, waiting for an in-flight sweep to end.
    pub fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.worker.take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                log::warn!("maturation thread panicked");
            }
            log::info!("maturation sweep stopped");
        }
    }
}

impl Drop for MaturationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_single_flight(processor: &Mutex<MaturationProcessor>) -> LedgerResult<SweepOutcome> {
    let mut guard = match processor.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Ok(SweepOutcome::Skipped),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    Ok(SweepOutcome::Ran(guard.sweep()?))
}
