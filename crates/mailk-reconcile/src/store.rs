//! Resource store contract.
//!
//! # Invariants
//! - Every write is compare-and-swap on `metadata.resource_version`; a stale
//!   write fails with [`StoreError::Conflict`] and changes nothing.
//! - [`RecordStore::update`] writes spec + metadata only and bumps
//!   `generation` iff the spec changed. [`RecordStore::update_status`] writes
//!   status only. The two channels never clobber each other.
//! - A record whose deletion was requested is removed by the store as soon
//!   as its finalizer list is empty.
//! - Status-only writes do not emit change notifications.

use std::fmt;
use std::sync::Arc;

use mailk_schemas::{MailRequest, RecordKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record changed since it was read.
    Conflict { key: RecordKey },
    /// The record does not exist (any more).
    NotFound { key: RecordKey },
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict { key } => write!(f, "STORE_CONFLICT: {key} was modified"),
            StoreError::NotFound { key } => write!(f, "STORE_NOT_FOUND: {key}"),
            StoreError::Backend(msg) => write!(f, "STORE_BACKEND: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Synchronous store access used by the engine. Implementations may block.
pub trait RecordStore {
    fn get(&self, key: &RecordKey) -> Result<Option<MailRequest>, StoreError>;

    /// Write spec and metadata (finalizers, annotations). Returns the stored
    /// record, or `None` if the write released the last finalizer of a
    /// record pending deletion and the store removed it.
    fn update(&self, record: &MailRequest) -> Result<Option<MailRequest>, StoreError>;

    /// Write status. Returns the stored record with its new resource version.
    fn update_status(&self, record: &MailRequest) -> Result<MailRequest, StoreError>;

    /// Every stored key, for periodic resync.
    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn get(&self, key: &RecordKey) -> Result<Option<MailRequest>, StoreError> {
        (**self).get(key)
    }

    fn update(&self, record: &MailRequest) -> Result<Option<MailRequest>, StoreError> {
        (**self).update(record)
    }

    fn update_status(&self, record: &MailRequest) -> Result<MailRequest, StoreError> {
        (**self).update_status(record)
    }

    fn list_keys(&self) -> Result<Vec<RecordKey>, StoreError> {
        (**self).list_keys()
    }
}
