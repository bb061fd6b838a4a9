//! Per-key serialized work queue.
//!
//! # Invariants
//! - A key is queued at most once (duplicate adds coalesce).
//! - A key handed to a worker is in flight until [`WorkQueue::done`]; adds
//!   during that window mark it dirty instead of queueing it, so two
//!   attempts for one key never overlap.
//! - A dirty key is re-queued exactly once when its attempt finishes.

use std::collections::{HashSet, VecDeque};

use mailk_schemas::RecordKey;

#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: VecDeque<RecordKey>,
    queued: HashSet<RecordKey>,
    in_flight: HashSet<RecordKey>,
    dirty: HashSet<RecordKey>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key became runnable (a worker should wake).
    pub fn add(&mut self, key: RecordKey) -> bool {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Take the next runnable key and mark it in flight.
    pub fn pop(&mut self) -> Option<RecordKey> {
        let key = self.queue.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Finish an attempt. Returns `true` if the key was dirty and is queued
    /// again.
    pub fn done(&mut self, key: &RecordKey) -> bool {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            return self.add(key.clone());
        }
        false
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
