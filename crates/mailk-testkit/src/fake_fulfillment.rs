//! Scripted fulfillment provider.
//!
//! Deterministic: order ids are `order-1`, `order-2`, ... unless pinned with
//! [`FakeFulfillment::with_order_id`]. No network I/O. Every adapter call is
//! counted, and the next call of each kind can be made to fail.
//!
//! Like the real provider, a create carrying an idempotency key that was
//! already used returns the original order instead of a new one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use mailk_execution::{
    FulfillmentAdapter, GatewayError, GatewayInvokeToken, GatewayResult, OrderPayload,
    OrderRecord,
};

pub const STATE_AWAITING: &str = "awaiting_fulfillment";
pub const STATE_FULFILLED: &str = "fulfilled";
pub const STATE_CANCELLED: &str = "cancelled";

#[derive(Default)]
struct State {
    orders: BTreeMap<String, OrderRecord>,
    by_idempotency_key: BTreeMap<String, String>,
    payloads: Vec<OrderPayload>,
    next_id: u64,
    pinned_id: Option<String>,
    initial_state: Option<String>,
    initial_total: i64,
    create_faults: VecDeque<GatewayError>,
    lost_create_responses: usize,
    fetch_faults: VecDeque<GatewayError>,
    cancel_faults: VecDeque<GatewayError>,
    creates: usize,
    fetches: usize,
    cancels: usize,
}

#[derive(Default)]
pub struct FakeFulfillment {
    state: Mutex<State>,
}

impl FakeFulfillment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next created order gets this id.
    pub fn with_order_id(self, order_id: &str) -> Self {
        self.lock().pinned_id = Some(order_id.to_string());
        self
    }

    /// State and total reported for newly created orders.
    pub fn with_initial(self, state: &str, total: i64) -> Self {
        {
            let mut s = self.lock();
            s.initial_state = Some(state.to_string());
            s.initial_total = total;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -----------------------------------------------------------------------
    // Provider-side changes
    // -----------------------------------------------------------------------

    /// Move an existing order to `state` (as the provider's back office would).
    pub fn set_state(&self, order_id: &str, state: &str) {
        let mut s = self.lock();
        if let Some(order) = s.orders.get_mut(order_id) {
            order.state = state.to_string();
            order.modified = Some(Utc::now());
        }
    }

    /// Register an order the fake did not create itself.
    pub fn seed_order(&self, order: OrderRecord) {
        self.lock().orders.insert(order.order_id.clone(), order);
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    pub fn fail_next_create(&self, err: GatewayError) {
        self.lock().create_faults.push_back(err);
    }

    /// The next create succeeds at the provider but the caller sees a
    /// transport error.
    pub fn lose_next_create_response(&self) {
        self.lock().lost_create_responses += 1;
    }

    pub fn fail_next_fetch(&self, err: GatewayError) {
        self.lock().fetch_faults.push_back(err);
    }

    pub fn fail_next_cancel(&self, err: GatewayError) {
        self.lock().cancel_faults.push_back(err);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn create_calls(&self) -> usize {
        self.lock().creates
    }

    pub fn fetch_calls(&self) -> usize {
        self.lock().fetches
    }

    pub fn cancel_calls(&self) -> usize {
        self.lock().cancels
    }

    pub fn total_calls(&self) -> usize {
        let s = self.lock();
        s.creates + s.fetches + s.cancels
    }

    /// Distinct orders that exist at the provider.
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.lock().orders.get(order_id).cloned()
    }

    /// Payloads received by create, in call order.
    pub fn payloads(&self) -> Vec<OrderPayload> {
        self.lock().payloads.clone()
    }
}

impl FulfillmentAdapter for FakeFulfillment {
    fn create_order(
        &self,
        payload: &OrderPayload,
        idempotency_key: &str,
        _token: &GatewayInvokeToken,
    ) -> GatewayResult<OrderRecord> {
        let mut s = self.lock();
        s.creates += 1;
        s.payloads.push(payload.clone());
        if let Some(err) = s.create_faults.pop_front() {
            return Err(err);
        }

        let existing = s
            .by_idempotency_key
            .get(idempotency_key)
            .and_then(|id| s.orders.get(id))
            .cloned();
        let order = match existing {
            Some(order) => order,
            None => {
                s.next_id += 1;
                let order_id = s
                    .pinned_id
                    .take()
                    .unwrap_or_else(|| format!("order-{}", s.next_id));
                let order = OrderRecord {
                    order_id: order_id.clone(),
                    state: s
                        .initial_state
                        .clone()
                        .unwrap_or_else(|| STATE_AWAITING.to_string()),
                    total: s.initial_total,
                    created: Some(Utc::now()),
                    modified: None,
                    cancelled: None,
                    cancellation_reason: None,
                };
                s.orders.insert(order_id.clone(), order.clone());
                s.by_idempotency_key
                    .insert(idempotency_key.to_string(), order_id);
                order
            }
        };

        if s.lost_create_responses > 0 {
            s.lost_create_responses -= 1;
            return Err(GatewayError::Transport("connection reset after send".to_string()));
        }
        Ok(order)
    }

    fn get_order(&self, order_id: &str, _token: &GatewayInvokeToken) -> GatewayResult<OrderRecord> {
        let mut s = self.lock();
        s.fetches += 1;
        if let Some(err) = s.fetch_faults.pop_front() {
            return Err(err);
        }
        s.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                order_id: order_id.to_string(),
            })
    }

    fn cancel_order(&self, order_id: &str, _token: &GatewayInvokeToken) -> GatewayResult<()> {
        let mut s = self.lock();
        s.cancels += 1;
        if let Some(err) = s.cancel_faults.pop_front() {
            return Err(err);
        }
        let order = s
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::NotFound {
                order_id: order_id.to_string(),
            })?;
        let now = Utc::now();
        order.state = STATE_CANCELLED.to_string();
        order.cancelled = Some(now);
        order.modified = Some(now);
        order.cancellation_reason = Some("cancelled by requester".to_string());
        Ok(())
    }
}
