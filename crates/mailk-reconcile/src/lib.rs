//! mailk-reconcile
//!
//! The MailRequest control loop:
//! - `conditions`: Condition Tracker
//! - `finalizer`: Deletion Guard
//! - `engine`: Reconciliation Engine (validate → create once → poll)
//! - `store`: the resource store contract the engine writes through
//! - `backoff`: failure retry delays for the runtime
//!
//! Synchronous and single-record: one call is one attempt. Scheduling,
//! concurrency and per-key serialization live in `mailk-runtime`.

mod backoff;
pub mod conditions;
mod engine;
pub mod finalizer;
mod store;
mod types;

pub use backoff::BackoffPolicy;
pub use conditions::set_condition;
pub use engine::{Reconciler, SystemClock};
pub use finalizer::GuardOutcome;
pub use store::{RecordStore, StoreError};
pub use types::{GatewayStep, ReconcileConfig, ReconcileError, Requeue};
