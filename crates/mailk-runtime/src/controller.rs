//! Controller runtime: turns change notifications into reconciliation
//! attempts.
//!
//! ```text
//!   ChangeEvent ──► dispatcher ──► WorkQueue ──► worker × N ──► spawn_blocking(reconcile)
//!   resync tick ──┘                   ▲                              │
//!                                     └── delayed requeue ◄──────────┘
//!                                         (sync interval / backoff)
//! ```
//!
//! # Invariants
//! - Attempts for one key never overlap (see [`WorkQueue`]).
//! - A successful attempt forgets the key's failure count; a transient
//!   failure retries after `backoff.delay(failures)`.
//! - Validation failures are not retried; the next spec change (a new
//!   change notification) brings the key back.
//! - At most one delayed requeue is pending per key; the earliest wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailk_execution::FulfillmentAdapter;
use mailk_reconcile::{BackoffPolicy, ReconcileError, Reconciler, RecordStore, Requeue, StoreError};
use mailk_schemas::{ChangeEvent, RecordKey};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;

// ---------------------------------------------------------------------------
// Reconcile seam
// ---------------------------------------------------------------------------

/// What the runtime needs from the engine. Both calls block.
pub trait Reconcile: Send + Sync + 'static {
    fn reconcile(&self, key: &RecordKey) -> Result<Requeue, ReconcileError>;
    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError>;
}

impl<A, S, C> Reconcile for Reconciler<A, S, C>
where
    A: FulfillmentAdapter + Send + Sync + 'static,
    S: RecordStore + Send + Sync + 'static,
    C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
{
    fn reconcile(&self, key: &RecordKey) -> Result<Requeue, ReconcileError> {
        Reconciler::reconcile(self, key)
    }

    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError> {
        self.store().list_keys()
    }
}

// ---------------------------------------------------------------------------
// Config / reports / stats
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    pub workers: usize,
    pub backoff: BackoffPolicy,
    pub resync_interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Done,
    RequeueNow,
    RequeueAfter,
    /// Validation failed; waiting for a spec change.
    Invalid,
    /// Transient failure; retried with backoff.
    Failed,
}

/// One finished attempt, as published on the report channel.
#[derive(Clone, Debug, Serialize)]
pub struct AttemptReport {
    pub record: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_after_ms: Option<u64>,
    /// Consecutive failures for this record, after this attempt.
    pub failures: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub failures: u64,
    pub in_flight: usize,
    pub queued: usize,
    pub backing_off: usize,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    queue: Mutex<WorkQueue>,
    wake: Notify,
    failures: Mutex<HashMap<RecordKey, u32>>,
    scheduled: Mutex<HashMap<RecordKey, Instant>>,
    attempts: AtomicU64,
    failed: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(WorkQueue::new()),
            wake: Notify::new(),
            failures: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(HashMap::new()),
            attempts: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, key: RecordKey) {
        if lock(&self.queue).add(key) {
            self.wake.notify_one();
        }
    }

    fn forget(&self, key: &RecordKey) {
        lock(&self.failures).remove(key);
    }

    fn record_failure(&self, key: &RecordKey) -> u32 {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut failures = lock(&self.failures);
        let n = failures.entry(key.clone()).or_insert(0);
        *n = n.saturating_add(1);
        *n
    }

    fn snapshot(&self) -> StatsSnapshot {
        let (in_flight, queued) = {
            let q = lock(&self.queue);
            (q.in_flight(), q.queued())
        };
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failed.load(Ordering::Relaxed),
            in_flight,
            queued,
            backing_off: lock(&self.failures).len(),
        }
    }
}

/// Schedule `key` after `delay` unless an earlier requeue is already pending.
fn enqueue_after(
    shared: &Arc<Shared>,
    key: RecordKey,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let deadline = Instant::now() + delay;
    {
        let mut scheduled = lock(&shared.scheduled);
        if let Some(existing) = scheduled.get(&key) {
            if *existing <= deadline {
                return;
            }
        }
        scheduled.insert(key.clone(), deadline);
    }

    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let due = {
                    let mut scheduled = lock(&shared.scheduled);
                    if scheduled.get(&key) == Some(&deadline) {
                        scheduled.remove(&key);
                        true
                    } else {
                        false
                    }
                };
                if due {
                    shared.enqueue(key);
                }
            }
            _ = shutdown.changed() => {}
        }
    });
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Read-only view of controller counters.
#[derive(Clone)]
pub struct StatsHandle(Arc<Shared>);

impl StatsHandle {
    pub fn snapshot(&self) -> StatsSnapshot {
        self.0.snapshot()
    }
}

pub struct Controller {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    reports: broadcast::Sender<AttemptReport>,
    tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Spawn the dispatcher and `config.workers` workers on the current
    /// tokio runtime.
    pub fn start<R: Reconcile>(
        reconciler: Arc<R>,
        config: RuntimeConfig,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (reports, _) = broadcast::channel(256);

        let mut tasks = Vec::with_capacity(config.workers + 1);
        tasks.push(tokio::spawn(dispatch(
            shared.clone(),
            reconciler.clone(),
            config.resync_interval.max(Duration::from_secs(1)),
            events,
            shutdown_rx.clone(),
        )));
        for worker in 0..config.workers.max(1) {
            tasks.push(tokio::spawn(work(
                worker,
                shared.clone(),
                reconciler.clone(),
                config.backoff,
                reports.clone(),
                shutdown_rx.clone(),
            )));
        }
        info!(workers = config.workers.max(1), "controller started");

        Self {
            shared,
            shutdown,
            reports,
            tasks,
        }
    }

    pub fn enqueue(&self, key: RecordKey) {
        self.shared.enqueue(key);
    }

    pub fn stats(&self) -> StatsHandle {
        StatsHandle(self.shared.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttemptReport> {
        self.reports.subscribe()
    }

    /// Stop taking work and wait for in-flight attempts to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "controller task ended abnormally");
            }
        }
        info!("controller stopped");
    }
}

async fn dispatch<R: Reconcile>(
    shared: Arc<Shared>,
    reconciler: Arc<R>,
    resync_interval: Duration,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    // First tick fires immediately: the startup sweep.
    let mut resync = tokio::time::interval(resync_interval);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut feed_open = true;

    loop {
        tokio::select! {
            ev = events.recv(), if feed_open => match ev {
                Some(ev) => {
                    debug!(record = %ev.key, kind = ?ev.kind, "change notification");
                    shared.enqueue(ev.key);
                }
                None => {
                    warn!("change feed closed; relying on periodic resync");
                    feed_open = false;
                }
            },
            _ = resync.tick() => {
                let r = reconciler.clone();
                match tokio::task::spawn_blocking(move || r.list_keys()).await {
                    Ok(Ok(keys)) => {
                        debug!(count = keys.len(), "resync");
                        for key in keys {
                            shared.enqueue(key);
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "resync listing failed"),
                    Err(e) => error!(error = %e, "resync task failed"),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// What to do with a key once its attempt is settled.
enum Followup {
    Nothing,
    Now,
    After(Duration),
}

async fn work<R: Reconcile>(
    worker: usize,
    shared: Arc<Shared>,
    reconciler: Arc<R>,
    backoff: BackoffPolicy,
    reports: broadcast::Sender<AttemptReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let next = lock(&shared.queue).pop();
        let Some(key) = next else {
            tokio::select! {
                _ = shared.wake.notified() => continue,
                _ = shutdown.changed() => return,
            }
        };

        shared.attempts.fetch_add(1, Ordering::Relaxed);
        let r = reconciler.clone();
        let k = key.clone();
        let result = tokio::task::spawn_blocking(move || r.reconcile(&k)).await;

        let (report, followup) = settle(&shared, &key, result, backoff);
        debug!(worker, record = %key, outcome = ?report.outcome, "attempt finished");

        if lock(&shared.queue).done(&key) {
            shared.wake.notify_one();
        }
        match followup {
            Followup::Nothing => {}
            Followup::Now => shared.enqueue(key),
            Followup::After(d) => enqueue_after(&shared, key, d, shutdown.clone()),
        }
        // No subscribers is fine.
        let _ = reports.send(report);
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn settle(
    shared: &Shared,
    key: &RecordKey,
    result: Result<Result<Requeue, ReconcileError>, tokio::task::JoinError>,
    backoff: BackoffPolicy,
) -> (AttemptReport, Followup) {
    let report = |outcome, detail: Option<String>, after: Option<Duration>, failures| AttemptReport {
        record: key.to_string(),
        outcome,
        detail,
        requeue_after_ms: after.map(millis),
        failures,
        at: Utc::now(),
    };

    let failure = match result {
        Ok(Ok(requeue)) => {
            shared.forget(key);
            return match requeue {
                Requeue::Done => (report(AttemptOutcome::Done, None, None, 0), Followup::Nothing),
                Requeue::Now => (report(AttemptOutcome::RequeueNow, None, None, 0), Followup::Now),
                Requeue::After(d) => (
                    report(AttemptOutcome::RequeueAfter, None, Some(d), 0),
                    Followup::After(d),
                ),
            };
        }
        Ok(Err(e)) if !e.is_transient() => {
            shared.forget(key);
            info!(record = %key, error = %e, "record invalid; waiting for spec change");
            return (
                report(AttemptOutcome::Invalid, Some(e.to_string()), None, 0),
                Followup::Nothing,
            );
        }
        Ok(Err(e)) => e.to_string(),
        Err(join) => {
            error!(record = %key, error = %join, "reconcile attempt panicked");
            format!("attempt panicked: {join}")
        }
    };

    let failures = shared.record_failure(key);
    let delay = backoff.delay(failures);
    warn!(
        record = %key,
        failures,
        retry_in_ms = millis(delay),
        error = %failure,
        "reconcile attempt failed"
    );
    (
        report(AttemptOutcome::Failed, Some(failure), Some(delay), failures),
        Followup::After(delay),
    )
}
