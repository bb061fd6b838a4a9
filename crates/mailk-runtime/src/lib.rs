//! mailk-runtime
//!
//! Scheduling around the synchronous reconciliation engine: a per-key
//! serialized work queue, a worker pool running attempts on the blocking
//! thread pool, delayed requeue (sync interval and failure backoff) and a
//! periodic resync sweep.

mod controller;
mod queue;

pub use controller::{
    AttemptOutcome, AttemptReport, Controller, Reconcile, RuntimeConfig, StatsHandle,
    StatsSnapshot,
};
pub use queue::WorkQueue;
