//! Shared runtime state for mailk-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself
//! apart from the background forwarders it spawns.

use std::sync::Arc;
use std::time::Duration;

use mailk_runtime::{AttemptReport, StatsHandle, StatsSnapshot};
use mailk_schemas::ChangeEvent;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    /// One finished reconciliation attempt.
    Attempt(AttemptReport),
    LogLine { level: String, msg: String },
}

impl BusMsg {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
            BusMsg::Attempt(_) => "attempt",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of daemon state, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "idle" | "running" | "stopping"
    pub state: String,
    /// Hash of the layered config the controller was started with.
    pub config_hash: Option<String>,
    /// Controller counters; `None` when no controller is attached.
    pub controller: Option<StatsSnapshot>,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Handles into a running controller.
#[derive(Clone)]
pub struct ControllerLink {
    pub stats: StatsHandle,
    /// Feeds the controller's change channel (manual reconcile triggers).
    pub trigger: mpsc::UnboundedSender<ChangeEvent>,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub config_hash: Option<String>,
    pub controller: Option<ControllerLink>,
    /// "idle" | "running" | "stopping"
    pub lifecycle: Arc<RwLock<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// State without a controller (route tests, degraded boot).
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "mailk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash: None,
            controller: None,
            lifecycle: Arc::new(RwLock::new("idle".to_string())),
        }
    }

    pub fn with_controller(config_hash: String, link: ControllerLink) -> Self {
        let mut st = Self::new();
        st.config_hash = Some(config_hash);
        st.controller = Some(link);
        st.lifecycle = Arc::new(RwLock::new("running".to_string()));
        st
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.lifecycle.read().await.clone();
        let controller = self.controller.as_ref().map(|c| c.stats.snapshot());
        let notes = match &controller {
            None => Some("no controller attached".to_string()),
            Some(_) => None,
        };
        StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            state,
            config_hash: self.config_hash.clone(),
            controller,
            notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that republishes controller attempt reports on
/// the SSE bus. Ends when the controller's report channel closes.
pub fn spawn_report_forwarder(
    bus: broadcast::Sender<BusMsg>,
    mut reports: broadcast::Receiver<AttemptReport>,
) {
    tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    let _ = bus.send(BusMsg::Attempt(report));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let _ = bus.send(BusMsg::LogLine {
                        level: "WARN".to_string(),
                        msg: format!("{skipped} attempt reports dropped (slow consumer)"),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
