//! In-memory resource store with the same write semantics as `mailk-db`.
//!
//! Also plays the external actor (insert, edit spec, request deletion,
//! annotate) and can inject write faults.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use mailk_reconcile::{RecordStore, StoreError};
use mailk_schemas::{ChangeEvent, ChangeKind, MailRequest, MailSpec, RecordKey, RecordMeta};

type Notifier = Box<dyn Fn(ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordKey, MailRequest>,
    next_version: i64,
    status_faults: VecDeque<StoreError>,
    update_faults: VecDeque<StoreError>,
    order_commit_faults: VecDeque<StoreError>,
    status_writes: usize,
    meta_writes: usize,
}

impl Inner {
    fn bump(&mut self) -> i64 {
        self.next_version += 1;
        self.next_version
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    notifier: Option<Notifier>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver change notifications (spec / metadata / deletion changes) to
    /// `notify`. Status-only writes are not announced.
    pub fn with_notifier(notify: impl Fn(ChangeEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::default(),
            notifier: Some(Box::new(notify)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a test already panicked.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, key: RecordKey, kind: ChangeKind) {
        if let Some(n) = &self.notifier {
            n(ChangeEvent::new(key, kind));
        }
    }

    // -----------------------------------------------------------------------
    // External actor
    // -----------------------------------------------------------------------

    /// Create a record with empty status. Replaces any record with that key.
    pub fn insert(&self, namespace: &str, name: &str, spec: MailSpec) -> MailRequest {
        let record = {
            let mut inner = self.lock();
            let mut record = MailRequest::new(namespace, name, spec);
            record.metadata = RecordMeta::new(namespace, name);
            record.metadata.resource_version = inner.bump();
            inner.records.insert(record.key(), record.clone());
            record
        };
        self.notify(record.key(), ChangeKind::Created);
        record
    }

    /// Edit the desired state as the owning user would. Bumps generation.
    pub fn edit_spec(&self, key: &RecordKey, edit: impl FnOnce(&mut MailSpec)) -> Option<MailRequest> {
        let out = {
            let mut inner = self.lock();
            let version = inner.bump();
            let record = inner.records.get_mut(key)?;
            edit(&mut record.spec);
            record.metadata.generation += 1;
            record.metadata.resource_version = version;
            record.clone()
        };
        self.notify(key.clone(), ChangeKind::Updated);
        Some(out)
    }

    pub fn set_annotation(&self, key: &RecordKey, name: &str, value: &str) -> bool {
        let found = {
            let mut inner = self.lock();
            let version = inner.bump();
            match inner.records.get_mut(key) {
                Some(record) => {
                    record
                        .metadata
                        .annotations
                        .insert(name.to_string(), value.to_string());
                    record.metadata.resource_version = version;
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(key.clone(), ChangeKind::Updated);
        }
        found
    }

    /// Mark the record for deletion. Removed at once if no finalizer guards it.
    pub fn request_delete(&self, key: &RecordKey) -> bool {
        let found = {
            let mut inner = self.lock();
            let version = inner.bump();
            let Some(record) = inner.records.get_mut(key) else {
                return false;
            };
            if record.metadata.deletion_requested_at.is_none() {
                record.metadata.deletion_requested_at = Some(Utc::now());
                record.metadata.resource_version = version;
            }
            if record.metadata.finalizers.is_empty() {
                inner.records.remove(key);
            }
            true
        };
        if found {
            self.notify(key.clone(), ChangeKind::DeleteRequested);
        }
        found
    }

    // -----------------------------------------------------------------------
    // Inspection / fault injection
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, key: &RecordKey) -> Option<MailRequest> {
        self.lock().records.get(key).cloned()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().records.contains_key(key)
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.lock().records.keys().cloned().collect()
    }

    /// Successful status writes so far.
    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    /// Successful spec/metadata writes so far.
    pub fn meta_writes(&self) -> usize {
        self.lock().meta_writes
    }

    /// The next status write fails with `err` instead of writing.
    pub fn fail_next_status_write(&self, err: StoreError) {
        self.lock().status_faults.push_back(err);
    }

    /// The next status write that records a new order id fails with `err`.
    /// Earlier status writes (validation) pass through.
    pub fn fail_next_order_commit(&self, err: StoreError) {
        self.lock().order_commit_faults.push_back(err);
    }

    /// The next spec/metadata write fails with `err` instead of writing.
    pub fn fail_next_update(&self, err: StoreError) {
        self.lock().update_faults.push_back(err);
    }
}

fn check_version(stored: &MailRequest, incoming: &MailRequest) -> Result<(), StoreError> {
    if stored.metadata.resource_version != incoming.metadata.resource_version {
        return Err(StoreError::Conflict {
            key: incoming.key(),
        });
    }
    Ok(())
}

impl RecordStore for InMemoryStore {
    fn get(&self, key: &RecordKey) -> Result<Option<MailRequest>, StoreError> {
        Ok(self.lock().records.get(key).cloned())
    }

    fn update(&self, record: &MailRequest) -> Result<Option<MailRequest>, StoreError> {
        let key = record.key();
        let out = {
            let mut inner = self.lock();
            if let Some(err) = inner.update_faults.pop_front() {
                return Err(err);
            }
            let version = inner.bump();
            let stored = inner
                .records
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
            check_version(stored, record)?;

            if stored.spec != record.spec {
                stored.spec = record.spec.clone();
                stored.metadata.generation += 1;
            }
            stored.metadata.finalizers = record.metadata.finalizers.clone();
            stored.metadata.annotations = record.metadata.annotations.clone();
            stored.metadata.resource_version = version;

            let removable =
                stored.metadata.is_deletion_requested() && stored.metadata.finalizers.is_empty();
            let out = if removable {
                inner.records.remove(&key);
                None
            } else {
                Some(stored.clone())
            };
            inner.meta_writes += 1;
            out
        };
        self.notify(key, ChangeKind::Updated);
        Ok(out)
    }

    fn update_status(&self, record: &MailRequest) -> Result<MailRequest, StoreError> {
        let key = record.key();
        let mut inner = self.lock();
        if let Some(err) = inner.status_faults.pop_front() {
            return Err(err);
        }
        let version = inner.bump();
        let stored = inner
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        check_version(stored, record)?;

        if record.status.has_order() && !stored.status.has_order() {
            if let Some(err) = inner.order_commit_faults.pop_front() {
                return Err(err);
            }
        }
        let stored = inner
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        stored.status = record.status.clone();
        stored.metadata.resource_version = version;
        let out = stored.clone();
        inner.status_writes += 1;
        Ok(out)
    }

    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError> {
        Ok(self.keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailk_schemas::FINALIZER;
    use std::sync::{Arc, Mutex};

    fn key() -> RecordKey {
        RecordKey::new("default", "letter")
    }

    #[test]
    fn stale_write_conflicts() {
        let store = InMemoryStore::new();
        let original = store.insert("default", "letter", MailSpec::default());

        let mut first = original.clone();
        first.status.valid = true;
        store.update_status(&first).unwrap();

        let mut stale = original;
        stale.status.sent = true;
        assert_eq!(
            store.update_status(&stale).unwrap_err(),
            StoreError::Conflict { key: key() }
        );
        assert!(!store.snapshot(&key()).unwrap().status.sent);
    }

    #[test]
    fn generation_moves_only_on_spec_change() {
        let store = InMemoryStore::new();
        let mut rec = store.insert("default", "letter", MailSpec::default());
        assert_eq!(rec.metadata.generation, 1);

        rec.metadata.add_finalizer(FINALIZER);
        let mut rec = store.update(&rec).unwrap().unwrap();
        assert_eq!(rec.metadata.generation, 1);

        rec.spec.service = "USPS_STANDARD".to_string();
        let rec = store.update(&rec).unwrap().unwrap();
        assert_eq!(rec.metadata.generation, 2);

        let rec = store.update_status(&rec).unwrap();
        assert_eq!(rec.metadata.generation, 2);
    }

    #[test]
    fn guarded_record_survives_delete_until_finalizer_removed() {
        let store = InMemoryStore::new();
        let mut rec = store.insert("default", "letter", MailSpec::default());
        rec.metadata.add_finalizer(FINALIZER);
        store.update(&rec).unwrap();

        assert!(store.request_delete(&key()));
        let mut rec = store.snapshot(&key()).expect("guard keeps it");
        assert!(rec.metadata.is_deletion_requested());

        rec.metadata.remove_finalizer(FINALIZER);
        assert_eq!(store.update(&rec).unwrap(), None);
        assert!(!store.contains(&key()));
    }

    #[test]
    fn unguarded_record_is_removed_on_delete() {
        let store = InMemoryStore::new();
        store.insert("default", "letter", MailSpec::default());
        assert!(store.request_delete(&key()));
        assert!(!store.contains(&key()));
    }

    #[test]
    fn notifier_skips_status_writes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let store = InMemoryStore::with_notifier(move |ev| sink.lock().unwrap().push(ev.kind));

        let rec = store.insert("default", "letter", MailSpec::default());
        store.update_status(&rec).unwrap();
        store.request_delete(&key());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeKind::Created, ChangeKind::DeleteRequested]
        );
    }
}
