//! Reconciliation Engine.
//!
//! One call to [`Reconciler::reconcile`] is one reconciliation attempt for
//! one record. Steps always run in this order:
//!
//! ```text
//!   load ──► deletion guard ──► terminal? ──► validate ──► create ──► fetch ──► merge
//!             │ Released          │ yes          │ fail       │ once     │
//!             ▼                   ▼              ▼            ▼          ▼
//!            Done                Done        Err(Validation) orderID   After(sync)
//!                                                           persisted
//! ```
//!
//! # Invariants
//! - `create` is reachable only through a `CreateClaim`, which exists only
//!   while the persisted status has no order id. The order id is persisted
//!   before any further provider call.
//! - A conflict while persisting the new order id reloads the record and
//!   re-applies the id; it never re-runs the create. If the id still cannot
//!   be persisted the attempt ends with `OrderUncommitted`, which is never
//!   restarted within the same call.
//! - A later attempt after `OrderUncommitted` (or a crash between create and
//!   the write) sees no order id and creates again. A second provider order
//!   is prevented only by the provider honoring the idempotency key, which is
//!   the record uid.
//! - `status.valid` only ever goes false → true.
//! - `status.sent` is recomputed from every fetched state.
//! - Provider failures leave the persisted status as it was.

use chrono::{DateTime, Utc};
use mailk_execution::{
    build, validate, CreateClaim, FulfillmentAdapter, FulfillmentGateway, OrderPayload,
    OrderRecord, OrderState,
};
use mailk_schemas::{
    ConditionStatus, MailRequest, MailStatus, RecordKey, CONDITION_FULFILLED,
    CONDITION_VALIDATED,
};
use tracing::{debug, info, info_span, warn};

use crate::conditions::set_condition;
use crate::finalizer::{self, GuardOutcome};
use crate::store::{RecordStore, StoreError};
use crate::types::{GatewayStep, ReconcileConfig, ReconcileError, Requeue};

/// Clock used for condition timestamps.
pub type SystemClock = fn() -> DateTime<Utc>;

pub struct Reconciler<A, S, C = SystemClock>
where
    A: FulfillmentAdapter,
    S: RecordStore,
    C: Fn() -> DateTime<Utc>,
{
    gateway: FulfillmentGateway<A>,
    store: S,
    config: ReconcileConfig,
    clock: C,
}

impl<A, S> Reconciler<A, S, SystemClock>
where
    A: FulfillmentAdapter,
    S: RecordStore,
{
    pub fn new(gateway: FulfillmentGateway<A>, store: S, config: ReconcileConfig) -> Self {
        Self::with_clock(gateway, store, config, Utc::now)
    }
}

impl<A, S, C> Reconciler<A, S, C>
where
    A: FulfillmentAdapter,
    S: RecordStore,
    C: Fn() -> DateTime<Utc>,
{
    pub fn with_clock(
        gateway: FulfillmentGateway<A>,
        store: S,
        config: ReconcileConfig,
        clock: C,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            clock,
        }
    }

    pub fn gateway(&self) -> &FulfillmentGateway<A> {
        &self.gateway
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run one reconciliation attempt for `key`.
    ///
    /// Store conflicts restart the attempt from a fresh load, up to
    /// `conflict_retries` times.
    pub fn reconcile(&self, key: &RecordKey) -> Result<Requeue, ReconcileError> {
        let span = info_span!("reconcile", record = %key);
        let _enter = span.enter();

        let mut conflicts = 0u32;
        loop {
            match self.attempt(key) {
                Err(ReconcileError::Conflict { .. }) if conflicts < self.config.conflict_retries => {
                    conflicts += 1;
                    debug!(conflicts, "store conflict; reloading");
                }
                Err(ReconcileError::Store(StoreError::NotFound { .. })) => {
                    debug!("record removed mid-attempt");
                    return Ok(Requeue::Done);
                }
                other => return other,
            }
        }
    }

    fn attempt(&self, key: &RecordKey) -> Result<Requeue, ReconcileError> {
        let Some(mut record) = self.store.get(key)? else {
            debug!("record not found");
            return Ok(Requeue::Done);
        };

        if finalizer::observe(&mut record, &self.store, &self.gateway)? == GuardOutcome::Released {
            return Ok(Requeue::Done);
        }

        if record.status.sent || OrderState::parse(&record.status.state) == OrderState::Cancelled {
            debug!(state = %record.status.state, "order terminal; nothing to do");
            return Ok(Requeue::Done);
        }

        if !record.status.has_order() {
            let payload = self.ensure_valid(&mut record)?;

            // Only reachable while the persisted status has no order id.
            if let Some(claim) = CreateClaim::acquire(&record.metadata, &record.status) {
                let order = self
                    .gateway
                    .create(&claim, &payload)
                    .map_err(ReconcileError::gateway(GatewayStep::Create))?;
                match self.commit_order(key, record, &order)? {
                    Some(stored) => record = stored,
                    None => return Ok(Requeue::Done),
                }
                if record.metadata.is_deletion_requested() {
                    return Ok(Requeue::Now);
                }
            }
        }

        let order_id = record.status.order_id.clone();
        let order = self
            .gateway
            .fetch(&order_id)
            .map_err(ReconcileError::gateway(GatewayStep::Fetch))?;

        let before = record.status.clone();
        let generation = record.metadata.generation;
        let now = (self.clock)();
        let status = &mut record.status;

        merge_order(status, &order, now, generation);
        if status.observed_generation < generation {
            status.last_attempt_message = Some(format!(
                "spec change at generation {generation} ignored: order {order_id} already created"
            ));
            status.observed_generation = generation;
        } else {
            status.last_attempt_message = Some(format!("order {order_id} is {}", order.state));
        }

        if record.status != before {
            self.store.update_status(&record)?;
        }
        info!(order_id = %order_id, state = %order.state, sent = record.status.sent, "order synced");
        Ok(Requeue::After(self.config.sync_interval))
    }

    /// Build and validate the payload. Status is written only when the
    /// verdict for the current generation is not already recorded.
    fn ensure_valid(&self, record: &mut MailRequest) -> Result<OrderPayload, ReconcileError> {
        let generation = record.metadata.generation;
        let payload = build(&record.spec);
        let verdict = validate(&payload, &self.config.services);
        let recorded = recorded_verdict(&record.status, generation);

        match verdict {
            Err(failure) => {
                if recorded != Some(false) {
                    let now = (self.clock)();
                    let status = &mut record.status;
                    set_condition(
                        &mut status.conditions,
                        CONDITION_VALIDATED,
                        ConditionStatus::False,
                        "InvalidSpec",
                        &failure.to_string(),
                        now,
                        generation,
                    );
                    status.observed_generation = generation;
                    status.last_attempt_message = Some(failure.to_string());
                    *record = self.store.update_status(record)?;
                }
                info!(
                    generation,
                    violations = failure.violations.len(),
                    "validation failed"
                );
                Err(ReconcileError::Validation(failure))
            }
            Ok(()) => {
                if recorded != Some(true) {
                    let now = (self.clock)();
                    let status = &mut record.status;
                    status.valid = true;
                    set_condition(
                        &mut status.conditions,
                        CONDITION_VALIDATED,
                        ConditionStatus::True,
                        "SpecValid",
                        "order request passed validation",
                        now,
                        generation,
                    );
                    status.observed_generation = generation;
                    status.last_attempt_message = Some("validated".to_string());
                    *record = self.store.update_status(record)?;
                    debug!(generation, "validated");
                }
                Ok(payload)
            }
        }
    }

    /// Persist a freshly created order id. Conflicts reload the record and
    /// re-apply the id; the create itself is never repeated. Returns `None`
    /// if the record vanished.
    ///
    /// Every failure here surfaces as [`ReconcileError::OrderUncommitted`],
    /// which the restart loop in [`Reconciler::reconcile`] does not retry.
    fn commit_order(
        &self,
        key: &RecordKey,
        mut record: MailRequest,
        order: &OrderRecord,
    ) -> Result<Option<MailRequest>, ReconcileError> {
        let uncommitted = |source: StoreError| {
            warn!(order_id = %order.order_id, error = %source, "order created but id not persisted");
            ReconcileError::OrderUncommitted {
                order_id: order.order_id.clone(),
                source,
            }
        };

        let mut conflicts = 0u32;
        loop {
            let generation = record.metadata.generation;
            let now = (self.clock)();
            let status = &mut record.status;
            status.order_id = order.order_id.clone();
            merge_order(status, order, now, generation);
            status.last_attempt_message = Some(format!("order {} created", order.order_id));

            let err = match self.store.update_status(&record) {
                Ok(stored) => return Ok(Some(stored)),
                Err(e) => e,
            };
            match err {
                StoreError::Conflict { .. } if conflicts < self.config.conflict_retries => {
                    conflicts += 1;
                    debug!(conflicts, order_id = %order.order_id, "conflict persisting order id; reloading");
                }
                StoreError::NotFound { .. } => {
                    warn!(order_id = %order.order_id, "record vanished after order create");
                    return Ok(None);
                }
                other => return Err(uncommitted(other)),
            }

            match self.store.get(key) {
                Ok(Some(fresh)) => record = fresh,
                Ok(None) => {
                    warn!(order_id = %order.order_id, "record vanished after order create");
                    return Ok(None);
                }
                Err(e) => return Err(uncommitted(e)),
            }
        }
    }
}

/// Verdict of the `Validated` condition if it was recorded for `generation`.
fn recorded_verdict(status: &MailStatus, generation: i64) -> Option<bool> {
    status
        .condition(CONDITION_VALIDATED)
        .filter(|c| c.observed_generation == generation && status.observed_generation == generation)
        .map(|c| c.status == ConditionStatus::True)
}

/// Mirror the provider's view into `status` and derive `sent` and the
/// `Fulfilled` condition.
fn merge_order(status: &mut MailStatus, order: &OrderRecord, now: DateTime<Utc>, generation: i64) {
    let state = order.order_state();
    status.state = order.state.clone();
    status.total = order.total;
    status.created = order.created;
    status.modified = order.modified;
    status.cancelled = order.cancelled;
    status.cancellation_reason = order.cancellation_reason.clone();
    status.sent = state == OrderState::Fulfilled;

    let reason = match &state {
        OrderState::Fulfilled => "OrderFulfilled",
        OrderState::AwaitingFulfillment => "AwaitingFulfillment",
        OrderState::Cancelled => "OrderCancelled",
        OrderState::Other(_) => "OrderPending",
    };
    set_condition(
        &mut status.conditions,
        CONDITION_FULFILLED,
        ConditionStatus::from(status.sent),
        reason,
        &format!("order {} is {}", order.order_id, order.state),
        now,
        generation,
    );
}
