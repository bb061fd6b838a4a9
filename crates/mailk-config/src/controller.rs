//! Typed view of the controller's configuration.
//!
//! Every key is optional; absent keys fall back to the defaults below. Values
//! of the wrong type are an error rather than a silent default so a typo in a
//! YAML overlay is caught at startup.

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;

/// Service tiers the fulfillment provider publishes. Used when
/// `/gateway/services` is absent.
pub const DEFAULT_SERVICES: &[&str] = &[
    "FEDEX_OVERNIGHT",
    "USPS_PRIORITY_EXPRESS",
    "USPS_PRIORITY",
    "USPS_CERTIFIED_PHYSICAL_RECEIPT",
    "USPS_CERTIFIED_RECEIPT",
    "USPS_CERTIFIED",
    "USPS_FIRST_CLASS",
    "USPS_STANDARD",
    "USPS_POSTCARD",
];

const DEFAULT_API_KEY_ENV: &str = "MAILK_GATEWAY_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Provider API root, e.g. `https://www.mailform.io/app/api/v1`.
    /// `None` when not configured; the daemon refuses to start without it.
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// NAME of the env var holding the API key (never the key itself).
    pub api_key_env: String,
    /// Service identifiers the provider recognizes.
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Delay before re-polling an order after a successful fetch.
    pub sync_interval: Duration,
    /// Interval of the full resync sweep over every stored record.
    pub resync_interval: Duration,
    /// First retry delay after a failed attempt; doubles per failure.
    pub backoff_base: Duration,
    /// Upper bound on the failure retry delay.
    pub backoff_max: Duration,
    /// Reload-and-retry budget for optimistic-concurrency conflicts.
    pub conflict_retries: u32,
    pub workers: usize,
    pub gateway: GatewayConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            resync_interval: Duration::from_secs(600),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            conflict_retries: 3,
            workers: 4,
            gateway: GatewayConfig {
                base_url: None,
                timeout: Duration::from_secs(30),
                api_key_env: DEFAULT_API_KEY_ENV.to_string(),
                services: DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

impl ControllerConfig {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let d = Self::default();

        let sync_interval = read_u64(config, "/controller/sync_interval_secs")?
            .map(Duration::from_secs)
            .unwrap_or(d.sync_interval);
        let resync_interval = read_u64(config, "/controller/resync_interval_secs")?
            .map(Duration::from_secs)
            .unwrap_or(d.resync_interval);
        let backoff_base = read_u64(config, "/controller/backoff/base_ms")?
            .map(Duration::from_millis)
            .unwrap_or(d.backoff_base);
        let backoff_max = read_u64(config, "/controller/backoff/max_secs")?
            .map(Duration::from_secs)
            .unwrap_or(d.backoff_max);
        let conflict_retries = read_u64(config, "/controller/conflict_retries")?
            .map(|n| n as u32)
            .unwrap_or(d.conflict_retries);
        let workers = read_u64(config, "/controller/workers")?
            .map(|n| n as usize)
            .unwrap_or(d.workers);

        if sync_interval.is_zero() {
            bail!("CONFIG_INVALID: /controller/sync_interval_secs must be > 0");
        }
        if workers == 0 {
            bail!("CONFIG_INVALID: /controller/workers must be > 0");
        }
        if backoff_base > backoff_max {
            bail!("CONFIG_INVALID: /controller/backoff/base_ms exceeds /controller/backoff/max_secs");
        }

        let base_url = read_str(config, "/gateway/base_url")?;
        let timeout = read_u64(config, "/gateway/timeout_secs")?
            .map(Duration::from_secs)
            .unwrap_or(d.gateway.timeout);
        let api_key_env =
            read_str(config, "/gateway/keys_env/api_key")?.unwrap_or(d.gateway.api_key_env);
        let services = match config.pointer("/gateway/services") {
            None | Some(Value::Null) => d.gateway.services,
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str().map(str::trim) {
                        Some(s) if !s.is_empty() => out.push(s.to_string()),
                        _ => bail!("CONFIG_INVALID: /gateway/services/{i} must be a non-empty string"),
                    }
                }
                out
            }
            Some(_) => bail!("CONFIG_INVALID: /gateway/services must be a list of strings"),
        };

        Ok(Self {
            sync_interval,
            resync_interval,
            backoff_base,
            backoff_max,
            conflict_retries,
            workers,
            gateway: GatewayConfig {
                base_url,
                timeout,
                api_key_env,
                services,
            },
        })
    }
}

fn read_u64(config: &Value, pointer: &str) -> Result<Option<u64>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n)),
            None => bail!("CONFIG_INVALID: {pointer} must be a non-negative integer"),
        },
    }
}

fn read_str(config: &Value, pointer: &str) -> Result<Option<String>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => bail!("CONFIG_INVALID: {pointer} must be a string"),
    }
}
