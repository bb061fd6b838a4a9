use std::fmt;
use std::time::Duration;

use mailk_execution::{GatewayError, ServiceCatalog, ValidationFailure};
use mailk_schemas::RecordKey;

use crate::store::StoreError;

/// What the engine tells the runtime to do after an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing further to do until the record changes.
    Done,
    /// Run another attempt as soon as a worker is free.
    Now,
    /// Poll again after the given delay.
    After(Duration),
}

/// Which provider call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayStep {
    Create,
    Fetch,
    Cancel,
}

impl GatewayStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStep::Create => "create",
            GatewayStep::Fetch => "fetch",
            GatewayStep::Cancel => "cancel",
        }
    }
}

/// Failure of a reconciliation attempt.
///
/// `NotFound` on load is not an error: the attempt completes as
/// `Requeue::Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Desired state is invalid for the current generation. Recorded on the
    /// record as `Validated=False`; not retried until the spec changes.
    Validation(ValidationFailure),
    /// A provider call failed. Persisted status is left as it was before the
    /// call.
    Gateway {
        step: GatewayStep,
        source: GatewayError,
    },
    /// Optimistic concurrency retries were exhausted.
    Conflict { key: RecordKey },
    /// The provider accepted an order but its id could not be written back.
    /// Never restarted within the same attempt.
    OrderUncommitted { order_id: String, source: StoreError },
    /// The store failed for a reason other than a conflict.
    Store(StoreError),
}

impl ReconcileError {
    pub(crate) fn gateway(step: GatewayStep) -> impl FnOnce(GatewayError) -> Self {
        move |source| ReconcileError::Gateway { step, source }
    }

    /// Transient failures are retried with backoff; validation failures wait
    /// for the next spec change.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ReconcileError::Validation(_))
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Validation(v) => write!(f, "{v}"),
            ReconcileError::Gateway { step, source } => {
                write!(f, "gateway {} failed: {source}", step.as_str())
            }
            ReconcileError::Conflict { key } => {
                write!(f, "RECONCILE_CONFLICT: {key} kept changing under the attempt")
            }
            ReconcileError::OrderUncommitted { order_id, source } => {
                write!(f, "ORDER_UNCOMMITTED: order {order_id} created but not recorded: {source}")
            }
            ReconcileError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Validation(v) => Some(v),
            ReconcileError::Gateway { source, .. } => Some(source),
            ReconcileError::Conflict { .. } => None,
            ReconcileError::OrderUncommitted { source, .. } => Some(source),
            ReconcileError::Store(e) => Some(e),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { key } => ReconcileError::Conflict { key },
            other => ReconcileError::Store(other),
        }
    }
}

/// Engine tunables, usually derived from `mailk_config::ControllerConfig`.
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Delay before polling an order again.
    pub sync_interval: Duration,
    /// Extra attempts after an optimistic-concurrency conflict.
    pub conflict_retries: u32,
    pub services: ServiceCatalog,
}

impl ReconcileConfig {
    pub fn new(sync_interval: Duration, conflict_retries: u32, services: ServiceCatalog) -> Self {
        Self {
            sync_interval,
            conflict_retries,
            services,
        }
    }
}
