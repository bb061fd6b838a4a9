//! Order Router: crate-private delegation layer to a fulfillment adapter.
//!
//! This module is intentionally NOT re-exported as a whole from `lib.rs`.
//! External crates implement [`FulfillmentAdapter`] but can only reach it
//! through [`crate::FulfillmentGateway`], which is the single path to
//! provider operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::order_state::OrderState;
use crate::payload::OrderPayload;

// ---------------------------------------------------------------------------
// Invocation token
// ---------------------------------------------------------------------------

/// Proof that an adapter call was issued by `FulfillmentGateway`.
///
/// The inner field is `pub(crate)`, so external crates can name the type in
/// their `FulfillmentAdapter` impls but cannot construct one:
///
/// ```text
/// GatewayInvokeToken(())   // ERROR outside mailk-execution: private field
/// ```
#[derive(Debug)]
pub struct GatewayInvokeToken(pub(crate) ());

// ---------------------------------------------------------------------------
// Provider order view
// ---------------------------------------------------------------------------

/// The provider's representation of an accepted mail job, as returned by
/// create and fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub order_id: String,
    /// Lifecycle label exactly as the provider reported it.
    pub state: String,
    pub total: i64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub cancelled: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl OrderRecord {
    /// Parsed lifecycle state.
    pub fn order_state(&self) -> OrderState {
        OrderState::parse(&self.state)
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Failure of a create / fetch / cancel call.
///
/// The reconciler treats every variant as transient: the attempt fails, no
/// persisted field is touched, and the same step is retried after backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, TLS or timeout failure before a response arrived.
    Transport(String),
    /// The provider answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The provider does not know the order.
    NotFound { order_id: String },
    /// The provider answered but the body could not be decoded.
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "GATEWAY_TRANSPORT: {msg}"),
            GatewayError::Rejected { status, body } => {
                write!(f, "GATEWAY_REJECTED: status={status} body={body}")
            }
            GatewayError::NotFound { order_id } => {
                write!(f, "GATEWAY_NOT_FOUND: order {order_id} unknown to provider")
            }
            GatewayError::Decode(msg) => write!(f, "GATEWAY_DECODE: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Convenience alias used throughout this module.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// FulfillmentAdapter trait (public; external crates implement this)
// ---------------------------------------------------------------------------

/// Synchronous provider operations. Implementations block on the network.
///
/// Declared `pub` so external crates can provide implementations (HTTP,
/// scripted fakes), but routing always flows through `FulfillmentGateway`.
pub trait FulfillmentAdapter {
    /// Create an order. `idempotency_key` is stable per record so a provider
    /// that honours it never creates a second order for the same record.
    fn create_order(
        &self,
        payload: &OrderPayload,
        idempotency_key: &str,
        token: &GatewayInvokeToken,
    ) -> GatewayResult<OrderRecord>;

    fn get_order(&self, order_id: &str, token: &GatewayInvokeToken) -> GatewayResult<OrderRecord>;

    fn cancel_order(&self, order_id: &str, token: &GatewayInvokeToken) -> GatewayResult<()>;
}

impl<A: FulfillmentAdapter + ?Sized> FulfillmentAdapter for Arc<A> {
    fn create_order(
        &self,
        payload: &OrderPayload,
        idempotency_key: &str,
        token: &GatewayInvokeToken,
    ) -> GatewayResult<OrderRecord> {
        (**self).create_order(payload, idempotency_key, token)
    }

    fn get_order(&self, order_id: &str, token: &GatewayInvokeToken) -> GatewayResult<OrderRecord> {
        (**self).get_order(order_id, token)
    }

    fn cancel_order(&self, order_id: &str, token: &GatewayInvokeToken) -> GatewayResult<()> {
        (**self).cancel_order(order_id, token)
    }
}

// ---------------------------------------------------------------------------
// OrderRouter (crate-private)
// ---------------------------------------------------------------------------

/// Crate-private router that delegates directly to an adapter, minting the
/// invocation token on the way through.
pub(crate) struct OrderRouter<A: FulfillmentAdapter> {
    adapter: A,
}

impl<A: FulfillmentAdapter> OrderRouter<A> {
    pub(crate) fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub(crate) fn adapter(&self) -> &A {
        &self.adapter
    }

    pub(crate) fn route_create(
        &self,
        payload: &OrderPayload,
        idempotency_key: &str,
    ) -> GatewayResult<OrderRecord> {
        self.adapter
            .create_order(payload, idempotency_key, &GatewayInvokeToken(()))
    }

    pub(crate) fn route_get(&self, order_id: &str) -> GatewayResult<OrderRecord> {
        self.adapter.get_order(order_id, &GatewayInvokeToken(()))
    }

    pub(crate) fn route_cancel(&self, order_id: &str) -> GatewayResult<()> {
        self.adapter.cancel_order(order_id, &GatewayInvokeToken(()))
    }
}

// ---------------------------------------------------------------------------
// Internal unit tests
// ---------------------------------------------------------------------------
