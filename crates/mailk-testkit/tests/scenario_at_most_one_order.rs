//! Scenario: at most one provider order per record.
//!
//! The create call is the single non-idempotent step. Whatever fails around
//! it (the order-id write, the response, the follow-up fetch), later attempts
//! must not produce a second order.

use std::sync::Arc;

use mailk_execution::GatewayError;
use mailk_reconcile::{ReconcileError, Requeue, StoreError};
use mailk_schemas::RecordKey;
use mailk_testkit::fixtures::{config, reconciler, valid_spec, TestClock, SYNC_INTERVAL};
use mailk_testkit::{FakeFulfillment, InMemoryStore};

fn setup() -> (Arc<FakeFulfillment>, Arc<InMemoryStore>, RecordKey, TestClock) {
    let provider = Arc::new(FakeFulfillment::new());
    let store = Arc::new(InMemoryStore::new());
    let key = store.insert("billing", "invoice-42", valid_spec()).key();
    (provider, store, key, TestClock::new())
}

#[test]
fn conflict_on_order_id_write_does_not_recreate() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    // Someone else wrote the record between our load and the order-id write.
    store.fail_next_order_commit(StoreError::Conflict { key: key.clone() });

    assert_eq!(r.reconcile(&key).unwrap(), Requeue::After(SYNC_INTERVAL));
    assert_eq!(r.reconcile(&key).unwrap(), Requeue::After(SYNC_INTERVAL));

    assert_eq!(provider.create_calls(), 1, "create must run exactly once");
    assert_eq!(provider.order_count(), 1);
    let rec = store.snapshot(&key).unwrap();
    assert_eq!(rec.status.order_id, "order-1");
}

#[test]
fn exhausted_commit_conflicts_never_recreate_within_one_attempt() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    for _ in 0..=config().conflict_retries {
        store.fail_next_order_commit(StoreError::Conflict { key: key.clone() });
    }

    let err = r.reconcile(&key).unwrap_err();
    assert_eq!(
        err,
        ReconcileError::OrderUncommitted {
            order_id: "order-1".to_string(),
            source: StoreError::Conflict { key: key.clone() },
        }
    );
    assert!(err.is_transient());
    assert_eq!(provider.create_calls(), 1, "one attempt, one create");
    assert!(store.snapshot(&key).unwrap().status.order_id.is_empty());

    // The next attempt creates again with the same idempotency key and gets
    // the original order back.
    assert_eq!(r.reconcile(&key).unwrap(), Requeue::After(SYNC_INTERVAL));
    assert_eq!(provider.order_count(), 1);
    assert_eq!(store.snapshot(&key).unwrap().status.order_id, "order-1");
}

#[test]
fn backend_failure_on_order_commit_is_not_restarted() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    store.fail_next_order_commit(StoreError::Backend("connection reset".to_string()));

    assert!(matches!(
        r.reconcile(&key),
        Err(ReconcileError::OrderUncommitted { ref order_id, .. }) if order_id == "order-1"
    ));
    assert_eq!(provider.create_calls(), 1);

    r.reconcile(&key).unwrap();
    assert_eq!(provider.create_calls(), 2);
    assert_eq!(provider.order_count(), 1, "idempotency key absorbs the re-create");
}

#[test]
fn fetch_failure_after_create_keeps_order_id() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    provider.fail_next_fetch(GatewayError::Transport("timeout".to_string()));
    let err = r.reconcile(&key).unwrap_err();
    assert!(matches!(err, ReconcileError::Gateway { .. }));
    assert!(err.is_transient());
    assert_eq!(store.snapshot(&key).unwrap().status.order_id, "order-1");

    r.reconcile(&key).unwrap();
    assert_eq!(provider.create_calls(), 1);
    assert_eq!(provider.fetch_calls(), 2);
}

#[test]
fn failed_create_leaves_order_id_empty_and_retries_once() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    provider.fail_next_create(GatewayError::Rejected {
        status: 503,
        body: "maintenance".to_string(),
    });
    assert!(r.reconcile(&key).is_err());
    let rec = store.snapshot(&key).unwrap();
    assert!(rec.status.order_id.is_empty());
    assert!(rec.status.valid, "validation result survives a failed create");

    r.reconcile(&key).unwrap();
    assert_eq!(provider.create_calls(), 2);
    assert_eq!(provider.order_count(), 1);
}

#[test]
fn lost_create_response_is_absorbed_by_idempotency_key() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    provider.lose_next_create_response();
    assert!(r.reconcile(&key).is_err());
    r.reconcile(&key).unwrap();

    // Two create calls, but both carried the record uid as idempotency key.
    assert_eq!(provider.create_calls(), 2);
    assert_eq!(provider.order_count(), 1);
    assert_eq!(store.snapshot(&key).unwrap().status.order_id, "order-1");
}

#[test]
fn many_attempts_one_create() {
    let (provider, store, key, clock) = setup();
    let r = reconciler(provider.clone(), store.clone(), &clock);

    for _ in 0..10 {
        r.reconcile(&key).unwrap();
    }
    assert_eq!(provider.create_calls(), 1);
    assert_eq!(provider.fetch_calls(), 10);
}
