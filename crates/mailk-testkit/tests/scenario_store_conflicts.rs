//! Scenario: optimistic-concurrency conflicts are retried from a fresh load,
//! a bounded number of times.

use std::sync::Arc;

use mailk_reconcile::{ReconcileError, Requeue, StoreError};
use mailk_testkit::fixtures::{reconciler, valid_spec, TestClock};
use mailk_testkit::{FakeFulfillment, InMemoryStore};

#[test]
fn conflict_on_guard_attach_is_retried() {
    let provider = Arc::new(FakeFulfillment::new());
    let store = Arc::new(InMemoryStore::new());
    let key = store.insert("default", "letter", valid_spec()).key();
    let r = reconciler(provider.clone(), store.clone(), &TestClock::new());

    store.fail_next_update(StoreError::Conflict { key: key.clone() });
    assert!(matches!(r.reconcile(&key).unwrap(), Requeue::After(_)));
    assert_eq!(provider.create_calls(), 1);
}

#[test]
fn persistent_conflicts_surface_after_budget() {
    let provider = Arc::new(FakeFulfillment::new());
    let store = Arc::new(InMemoryStore::new());
    let key = store.insert("default", "letter", valid_spec()).key();
    let r = reconciler(provider.clone(), store.clone(), &TestClock::new());

    // conflict_retries = 3 → 4 attempts in total.
    for _ in 0..4 {
        store.fail_next_update(StoreError::Conflict { key: key.clone() });
    }
    let err = r.reconcile(&key).unwrap_err();
    assert_eq!(err, ReconcileError::Conflict { key: key.clone() });
    assert!(err.is_transient());
    assert_eq!(provider.total_calls(), 0);
}

#[test]
fn record_gone_before_load_is_done() {
    let provider = Arc::new(FakeFulfillment::new());
    let store = Arc::new(InMemoryStore::new());
    let key = store.insert("default", "letter", valid_spec()).key();
    store.request_delete(&key);
    let r = reconciler(provider.clone(), store, &TestClock::new());

    assert_eq!(r.reconcile(&key).unwrap(), Requeue::Done);
    assert_eq!(provider.total_calls(), 0);
}
