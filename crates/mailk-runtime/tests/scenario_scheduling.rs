//! Scenario: scheduling guarantees, checked with a scripted engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailk_execution::{FieldViolation, GatewayError, ValidationFailure};
use mailk_reconcile::{BackoffPolicy, GatewayStep, ReconcileError, Requeue, StoreError};
use mailk_runtime::{AttemptOutcome, AttemptReport, Controller, Reconcile, RuntimeConfig};
use mailk_schemas::{ChangeEvent, ChangeKind, RecordKey};
use tokio::sync::{broadcast, mpsc};

/// Engine stand-in: each key replays a script of results, then reports Done.
#[derive(Default)]
struct Scripted {
    scripts: Mutex<HashMap<RecordKey, Vec<Result<Requeue, ReconcileError>>>>,
    running: AtomicUsize,
    overlaps: AtomicUsize,
    calls: AtomicUsize,
}

impl Scripted {
    fn script(&self, key: &RecordKey, mut results: Vec<Result<Requeue, ReconcileError>>) {
        results.reverse();
        self.scripts.lock().unwrap().insert(key.clone(), results);
    }
}

impl Reconcile for Scripted {
    fn reconcile(&self, key: &RecordKey) -> Result<Requeue, ReconcileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(Duration::from_millis(20));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(|s| s.pop())
            .unwrap_or(Ok(Requeue::Done));
        self.running.fetch_sub(1, Ordering::SeqCst);
        next
    }

    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError> {
        Ok(Vec::new())
    }
}

fn transient() -> Result<Requeue, ReconcileError> {
    Err(ReconcileError::Gateway {
        step: GatewayStep::Fetch,
        source: GatewayError::Transport("timeout".to_string()),
    })
}

fn config(workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        workers,
        backoff: BackoffPolicy::new(Duration::from_millis(20), Duration::from_millis(200)),
        resync_interval: Duration::from_secs(3600),
    }
}

async fn next_report(rx: &mut broadcast::Receiver<AttemptReport>) -> AttemptReport {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("report in time")
        .expect("channel open")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_key_never_runs_concurrently() {
    let engine = Arc::new(Scripted::default());
    let key = RecordKey::new("default", "letter");
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::start(engine.clone(), config(4), rx);

    for _ in 0..20 {
        tx.send(ChangeEvent::new(key.clone(), ChangeKind::Updated)).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.overlaps.load(Ordering::SeqCst), 0);
    let calls = engine.calls.load(Ordering::SeqCst);
    assert!(calls >= 1 && calls < 20, "bursts coalesce, got {calls}");
    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_back_off_then_reset() {
    let engine = Arc::new(Scripted::default());
    let key = RecordKey::new("default", "flaky");
    engine.script(&key, vec![transient(), transient(), Ok(Requeue::Done)]);

    let (_tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::start(engine.clone(), config(1), rx);
    let mut reports = controller.subscribe();
    controller.enqueue(key.clone());

    let first = next_report(&mut reports).await;
    assert_eq!(first.outcome, AttemptOutcome::Failed);
    assert_eq!(first.failures, 1);
    assert_eq!(first.requeue_after_ms, Some(20));

    let second = next_report(&mut reports).await;
    assert_eq!(second.outcome, AttemptOutcome::Failed);
    assert_eq!(second.failures, 2);
    assert_eq!(second.requeue_after_ms, Some(40));

    let third = next_report(&mut reports).await;
    assert_eq!(third.outcome, AttemptOutcome::Done);
    assert_eq!(third.failures, 0);

    let stats = controller.stats().snapshot();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.backing_off, 0);
    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn validation_failure_is_not_retried() {
    let engine = Arc::new(Scripted::default());
    let key = RecordKey::new("default", "bad");
    engine.script(
        &key,
        vec![Err(ReconcileError::Validation(ValidationFailure {
            violations: vec![FieldViolation::new("spec.service", "required")],
        }))],
    );

    let (_tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::start(engine.clone(), config(1), rx);
    let mut reports = controller.subscribe();
    controller.enqueue(key.clone());

    assert_eq!(next_report(&mut reports).await.outcome, AttemptOutcome::Invalid);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_interval_requeue_fires() {
    let engine = Arc::new(Scripted::default());
    let key = RecordKey::new("default", "polled");
    engine.script(
        &key,
        vec![Ok(Requeue::After(Duration::from_millis(30))), Ok(Requeue::Done)],
    );

    let (_tx, rx) = mpsc::unbounded_channel();
    let controller = Controller::start(engine.clone(), config(1), rx);
    let mut reports = controller.subscribe();
    controller.enqueue(key);

    let first = next_report(&mut reports).await;
    assert_eq!(first.outcome, AttemptOutcome::RequeueAfter);
    assert_eq!(first.requeue_after_ms, Some(30));
    assert_eq!(next_report(&mut reports).await.outcome, AttemptOutcome::Done);
    controller.shutdown().await;
}
