use std::collections::BTreeSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::leaf_pointers;

/// Which binary is consuming the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Long-running controller process.
    Daemon,
    /// Operator CLI (validation, db maintenance).
    Cli,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Daemon => "DAEMON",
            ConfigMode::Cli => "CLI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    pub consumed_prefixes: Vec<String>,
    /// Sorted, unique.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// What each binary actually reads. Keep in sync with
/// `ControllerConfig::from_config_json`, the daemon's `/server/bind_addr`
/// and the CLI's catalog loading.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::Daemon => &[
            "/controller/sync_interval_secs",
            "/controller/resync_interval_secs",
            "/controller/backoff/base_ms",
            "/controller/backoff/max_secs",
            "/controller/conflict_retries",
            "/controller/workers",
            "/gateway/base_url",
            "/gateway/timeout_secs",
            "/gateway/keys_env/api_key",
            "/gateway/services",
            "/server/bind_addr",
        ],
        ConfigMode::Cli => &["/gateway/services"],
    }
}

/// Leaves of `config_json` that `mode` never reads. With
/// [`UnusedKeyPolicy::Fail`] any such leaf is an error.
pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();

    let unused: BTreeSet<String> = leaf_pointers(config_json)
        .into_iter()
        .filter(|leaf| !consumed.iter().any(|c| covers(c, leaf)))
        .collect();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes: consumed.into_iter().collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let first: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} unused config leaf key(s) detected. \
             Remove them or update the consumed registry. First few: {:?}",
            report.mode,
            report.unused_leaf_pointers.len(),
            first
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// `/a/b` covers `/a/b` and `/a/b/c` but not `/a/bc`. `/` covers everything.
fn covers(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf
            .strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_respects_token_boundary() {
        assert!(covers("/gateway/services", "/gateway/services/3"));
        assert!(covers("/gateway", "/gateway"));
        assert!(!covers("/gateway/base", "/gateway/base_url"));
        assert!(covers("/", "/anything/at/all"));
    }

    #[test]
    fn normalize_adds_leading_and_strips_trailing_slash() {
        assert_eq!(normalize_pointer("controller/workers/"), "/controller/workers");
        assert_eq!(normalize_pointer(""), "/");
        assert_eq!(normalize_pointer("///"), "/");
    }

    #[test]
    fn cli_reads_only_services() {
        let cfg = serde_json::json!({
            "gateway": { "services": ["USPS_STANDARD"], "base_url": "http://x" },
        });
        let r = report_unused_keys(ConfigMode::Cli, &cfg, UnusedKeyPolicy::Warn).unwrap();
        assert_eq!(r.unused_leaf_pointers, vec!["/gateway/base_url".to_string()]);
        assert!(report_unused_keys(ConfigMode::Cli, &cfg, UnusedKeyPolicy::Fail).is_err());
    }
}
