//! Command handler modules for mailk-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod validate;

use anyhow::Result;
use mailk_config::{ControllerConfig, DEFAULT_SERVICES};
use mailk_execution::ServiceCatalog;
use tracing::debug;

/// Recognized services from layered config, or the provider defaults when
/// no config is given.
pub fn load_catalog(config_paths: &[String]) -> Result<ServiceCatalog> {
    if config_paths.is_empty() {
        return Ok(ServiceCatalog::new(DEFAULT_SERVICES.iter().copied()));
    }
    let refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = mailk_config::load_layered_yaml(&refs)?;
    let cfg = ControllerConfig::from_config_json(&loaded.config_json)?;
    debug!(config_hash = %loaded.config_hash, services = cfg.gateway.services.len(), "service catalog loaded");
    Ok(ServiceCatalog::new(cfg.gateway.services))
}

/// Parse a truthy/falsy CLI switch into the annotation value to store.
pub fn override_value(off: bool) -> Option<&'static str> {
    if off {
        None
    } else {
        Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_without_config() {
        let c = load_catalog(&[]).unwrap();
        assert!(c.contains("USPS_FIRST_CLASS"));
        assert_eq!(c.len(), DEFAULT_SERVICES.len());
    }

    #[test]
    fn override_switch() {
        assert_eq!(override_value(false), Some("true"));
        assert_eq!(override_value(true), None);
    }
}
