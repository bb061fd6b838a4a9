//! Fulfillment Gateway: the SINGLE choke-point for all provider operations.
//!
//! # Invariants
//!
//! **Compile-time:** `OrderRouter` is `pub(crate)` and never re-exported from
//! `lib.rs`. `FulfillmentAdapter` methods require a `&GatewayInvokeToken`
//! that only this crate can construct, so an adapter cannot be driven from
//! outside the gateway.
//!
//! **Compile-time:** [`FulfillmentGateway::create`] requires a
//! [`CreateClaim`]. The claim's `_priv` field is `pub(crate)`; the only way
//! to obtain one is [`CreateClaim::acquire`], which refuses when the record
//! already carries an order id. Creating a second order for a record
//! therefore needs a record whose persisted status has no order.
//!
//! ```text
//! Reconciler
//!     │
//!     ├──► CreateClaim::acquire(meta, status) ── None if orderID != ""
//!     │
//!     └──► FulfillmentGateway::create(&claim, payload)
//!                │
//!                └── OrderRouter::route_create(payload, claim.idempotency_key)
//!                         └── FulfillmentAdapter::create_order(…, &GatewayInvokeToken)
//! ```

use mailk_schemas::{MailStatus, RecordKey, RecordMeta};
use tracing::{debug, info, warn};

use crate::order_router::{FulfillmentAdapter, GatewayResult, OrderRecord, OrderRouter};
use crate::payload::OrderPayload;

// ---------------------------------------------------------------------------
// CreateClaim
// ---------------------------------------------------------------------------

/// Proof that the persisted status of a record carries no order yet.
///
/// ```text
/// ✅  CreateClaim::acquire(&meta, &status)          // Some only if orderID == ""
/// ❌  CreateClaim { _priv: (), .. }                  // ERROR: private field
/// ```
///
/// The idempotency key is the record uid, stable across attempts and
/// restarts, so a provider that honours it collapses a retried create into
/// the original order.
#[allow(clippy::manual_non_exhaustive)]
#[derive(Debug, Clone)]
pub struct CreateClaim {
    pub key: RecordKey,
    pub idempotency_key: String,
    pub(crate) _priv: (),
}

impl CreateClaim {
    pub fn acquire(meta: &RecordMeta, status: &MailStatus) -> Option<Self> {
        if status.has_order() {
            return None;
        }
        Some(Self {
            key: meta.key(),
            idempotency_key: meta.uid.to_string(),
            _priv: (),
        })
    }
}

// ---------------------------------------------------------------------------
// FulfillmentGateway
// ---------------------------------------------------------------------------

/// The SINGLE public path through which create / fetch / cancel flow.
///
/// Every call is synchronous. Errors are returned untouched; retry policy
/// belongs to the caller.
pub struct FulfillmentGateway<A: FulfillmentAdapter> {
    /// Private: unreachable from outside `mailk-execution`.
    router: OrderRouter<A>,
}

impl<A: FulfillmentAdapter> FulfillmentGateway<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            router: OrderRouter::new(adapter),
        }
    }

    /// Read-only access to the adapter (counters on test doubles, base URL
    /// on HTTP adapters). Adapter methods still need a gateway-minted token.
    pub fn adapter(&self) -> &A {
        self.router.adapter()
    }

    pub fn create(&self, claim: &CreateClaim, payload: &OrderPayload) -> GatewayResult<OrderRecord> {
        debug!(record = %claim.key, service = %payload.service, "gateway create");
        match self.router.route_create(payload, &claim.idempotency_key) {
            Ok(order) => {
                info!(
                    record = %claim.key,
                    order_id = %order.order_id,
                    state = %order.state,
                    "provider order created"
                );
                Ok(order)
            }
            Err(err) => {
                warn!(record = %claim.key, error = %err, "provider create failed");
                Err(err)
            }
        }
    }

    pub fn fetch(&self, order_id: &str) -> GatewayResult<OrderRecord> {
        debug!(order_id, "gateway fetch");
        self.router.route_get(order_id).inspect_err(|err| {
            warn!(order_id, error = %err, "provider fetch failed");
        })
    }

    pub fn cancel(&self, order_id: &str) -> GatewayResult<()> {
        debug!(order_id, "gateway cancel");
        match self.router.route_cancel(order_id) {
            Ok(()) => {
                info!(order_id, "provider order cancelled");
                Ok(())
            }
            Err(err) => {
                warn!(order_id, error = %err, "provider cancel failed");
                Err(err)
            }
        }
    }
}
