//! mailk-testkit
//!
//! Test doubles for the controller's two collaborators plus fixtures:
//! - [`InMemoryStore`]: resource store with CAS, generations, deletion
//!   semantics, change notifications and write-fault injection
//! - [`FakeFulfillment`]: scripted provider with call counters and faults

mod fake_fulfillment;
pub mod fixtures;
mod memory_store;

pub use fake_fulfillment::{FakeFulfillment, STATE_AWAITING, STATE_CANCELLED, STATE_FULFILLED};
pub use memory_store::InMemoryStore;
