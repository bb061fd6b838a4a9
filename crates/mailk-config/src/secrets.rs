//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"MAILK_GATEWAY_API_KEY"`).
//! - At startup, callers invoke [`resolve_gateway_secrets`] once and pass the
//!   result into constructors; `std::env::var` is not scattered elsewhere.
//! - `Debug` output redacts values.
//! - Error messages reference the env var **NAME**, never the value.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::ControllerConfig;

/// Secrets needed to talk to the fulfillment provider.
#[derive(Clone)]
pub struct GatewaySecrets {
    /// Provider API key. `None` if the named env var was absent or empty.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for GatewaySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySecrets")
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve gateway secrets named in `config_json`.
///
/// With `required = true` (the daemon) a missing API key fails closed with
/// `SECRETS_MISSING`; the CLI passes `false` since it never calls the provider.
pub fn resolve_gateway_secrets(config_json: &Value, required: bool) -> Result<GatewaySecrets> {
    let cfg = ControllerConfig::from_config_json(config_json)?;
    let var = cfg.gateway.api_key_env;
    let api_key = resolve_env(&var);

    if required && api_key.is_none() {
        bail!(
            "SECRETS_MISSING: required env var '{}' (gateway api_key) is not set or empty",
            var
        );
    }

    Ok(GatewaySecrets { api_key })
}
