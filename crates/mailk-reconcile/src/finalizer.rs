//! Deletion Guard.
//!
//! A two-phase commit against the provider: the guard marker
//! ([`FINALIZER`]) is removed only after the order is confirmed terminal,
//! successfully cancelled, or the operator set the skip-cancel override.
//!
//! # Invariants
//! - A record without a deletion request gets the marker attached
//!   (idempotent) and the attempt continues.
//! - With a deletion request and the override set, the marker is removed
//!   without any provider call.
//! - Otherwise, for a record with an order, fetch precedes cancel, and
//!   either failure leaves the marker attached.
//! - A non-terminal order is always cancelled before the marker goes.

use mailk_execution::{FulfillmentAdapter, FulfillmentGateway};
use mailk_schemas::{MailRequest, FINALIZER, SKIP_CANCEL_ANNOTATION};
use tracing::{debug, info};

use crate::store::RecordStore;
use crate::types::{GatewayStep, ReconcileError};

/// Result of running the guard on a freshly loaded record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No deletion pending; reconciliation continues.
    Continue,
    /// Deletion unblocked. The record is gone or will be; stop.
    Released,
}

/// Run the deletion protocol on `record`, persisting marker changes through
/// `store`. On `Continue`, `record` holds the latest stored version.
pub fn observe<A, S>(
    record: &mut MailRequest,
    store: &S,
    gateway: &FulfillmentGateway<A>,
) -> Result<GuardOutcome, ReconcileError>
where
    A: FulfillmentAdapter,
    S: RecordStore + ?Sized,
{
    let key = record.key();

    if !record.metadata.is_deletion_requested() {
        if record.metadata.add_finalizer(FINALIZER) {
            debug!(record = %key, "attaching deletion guard");
            match store.update(record)? {
                Some(stored) => *record = stored,
                None => return Ok(GuardOutcome::Released),
            }
        }
        return Ok(GuardOutcome::Continue);
    }

    if !record.metadata.has_finalizer(FINALIZER) {
        // Never guarded, or already released by an earlier attempt.
        return Ok(GuardOutcome::Released);
    }

    if record.metadata.annotation_flag(SKIP_CANCEL_ANNOTATION) {
        info!(
            record = %key,
            order_id = %record.status.order_id,
            "deletion override present; releasing without cancel"
        );
    } else if record.status.has_order() {
        let order_id = record.status.order_id.clone();
        let order = gateway
            .fetch(&order_id)
            .map_err(ReconcileError::gateway(GatewayStep::Fetch))?;
        let state = order.order_state();
        if state.is_terminal() {
            debug!(record = %key, order_id = %order_id, state = %state, "order already terminal");
        } else {
            gateway
                .cancel(&order_id)
                .map_err(ReconcileError::gateway(GatewayStep::Cancel))?;
            info!(record = %key, order_id = %order_id, prior_state = %state, "order cancelled for deletion");
        }
    }

    record.metadata.remove_finalizer(FINALIZER);
    store.update(record)?;
    info!(record = %key, "deletion guard released");
    Ok(GuardOutcome::Released)
}
