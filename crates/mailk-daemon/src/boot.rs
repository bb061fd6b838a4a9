//! Startup plumbing: settings resolution and config-to-component mapping.
//!
//! Kept out of `main.rs` so the mapping is testable without a database or
//! provider.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use mailk_config::{load_layered_yaml, ControllerConfig, LoadedConfig};
use mailk_execution::ServiceCatalog;
use mailk_reconcile::{BackoffPolicy, ReconcileConfig};
use mailk_runtime::RuntimeConfig;
use mailk_schemas::ChangeEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// Comma-separated config layers, later overriding earlier.
pub const ENV_CONFIG: &str = "MAILK_CONFIG";
pub const ENV_DAEMON_ADDR: &str = "MAILK_DAEMON_ADDR";
pub const DEFAULT_CONFIG_PATH: &str = "config/base.yaml";

pub fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8899))
}

/// Split a `MAILK_CONFIG` value into layer paths. Unset or blank means the
/// default base layer.
pub fn config_paths(raw: Option<&str>) -> Vec<String> {
    let paths: Vec<String> = raw
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if paths.is_empty() {
        vec![DEFAULT_CONFIG_PATH.to_string()]
    } else {
        paths
    }
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub loaded: LoadedConfig,
    pub controller: ControllerConfig,
    pub bind_addr: SocketAddr,
}

impl DaemonSettings {
    /// Load layered config. `addr_override` (from `MAILK_DAEMON_ADDR`) wins
    /// over `/server/bind_addr`.
    pub fn load(paths: &[String], addr_override: Option<&str>) -> Result<Self> {
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let loaded = load_layered_yaml(&refs)?;
        let controller = ControllerConfig::from_config_json(&loaded.config_json)?;

        let from_config = loaded
            .config_json
            .pointer("/server/bind_addr")
            .and_then(|v| v.as_str());
        let bind_addr = match addr_override.or(from_config) {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("CONFIG_INVALID: bad bind address '{raw}'"))?,
            None => default_bind_addr(),
        };

        debug!(config_hash = %loaded.config_hash, %bind_addr, "settings loaded");
        Ok(Self {
            loaded,
            controller,
            bind_addr,
        })
    }
}

pub fn reconcile_config(c: &ControllerConfig) -> ReconcileConfig {
    ReconcileConfig::new(
        c.sync_interval,
        c.conflict_retries,
        ServiceCatalog::new(c.gateway.services.iter().map(String::as_str)),
    )
}

pub fn runtime_config(c: &ControllerConfig) -> RuntimeConfig {
    RuntimeConfig {
        workers: c.workers,
        backoff: BackoffPolicy::new(c.backoff_base, c.backoff_max),
        resync_interval: c.resync_interval,
    }
}

/// Pipe the store's change feed into the controller channel, which also
/// carries manual triggers.
pub fn forward_changes(
    mut feed: mpsc::UnboundedReceiver<ChangeEvent>,
    into: mpsc::UnboundedSender<ChangeEvent>,
) {
    tokio::spawn(async move {
        while let Some(ev) = feed.recv().await {
            if into.send(ev).is_err() {
                return;
            }
        }
    });
}
