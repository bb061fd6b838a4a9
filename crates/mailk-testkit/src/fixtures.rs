//! Canned records, clocks and engine wiring for scenarios.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mailk_execution::{FulfillmentGateway, ServiceCatalog};
use mailk_reconcile::{ReconcileConfig, Reconciler};
use mailk_schemas::{Address, MailSpec};

use crate::{FakeFulfillment, InMemoryStore};

pub const SYNC_INTERVAL: Duration = Duration::from_secs(60);

pub fn address(name: &str, city: &str) -> Address {
    Address {
        name: name.to_string(),
        organization: None,
        address1: "100 Congress Ave".to_string(),
        address2: None,
        city: city.to_string(),
        state: "TX".to_string(),
        postcode: "78701".to_string(),
        country: "US".to_string(),
    }
}

/// A spec that passes validation against [`catalog`].
pub fn valid_spec() -> MailSpec {
    MailSpec {
        service: "USPS_FIRST_CLASS".to_string(),
        url: Some("https://files.example.com/letter.pdf".to_string()),
        customer_reference: Some("inv-42".to_string()),
        to: address("Ada Lovelace", "Austin"),
        from: address("Charles Babbage", "Dallas"),
        ..MailSpec::default()
    }
}

pub fn catalog() -> ServiceCatalog {
    ServiceCatalog::new(["USPS_FIRST_CLASS", "USPS_STANDARD", "USPS_PRIORITY"])
}

pub fn config() -> ReconcileConfig {
    ReconcileConfig::new(SYNC_INTERVAL, 3, catalog())
}

/// Manually advanced clock.
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    /// Starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut g) = self.now.lock() {
            *g += by;
        }
    }

    pub fn as_fn(&self) -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let clock = self.clone();
        move || clock.now()
    }
}

pub type TestReconciler =
    Reconciler<Arc<FakeFulfillment>, Arc<InMemoryStore>, Box<dyn Fn() -> DateTime<Utc> + Send + Sync>>;

/// Engine over shared fakes so the test keeps handles to both.
pub fn reconciler(
    provider: Arc<FakeFulfillment>,
    store: Arc<InMemoryStore>,
    clock: &TestClock,
) -> TestReconciler {
    Reconciler::with_clock(
        FulfillmentGateway::new(provider),
        store,
        config(),
        Box::new(clock.as_fn()),
    )
}
