//! mailk-config
//!
//! Layered YAML configuration for the mail controller.
//!
//! - Documents are merged in order: earlier docs are base, later docs override.
//! - Literal secrets are rejected (`CONFIG_SECRET_DETECTED`); config stores
//!   env var NAMES only, resolved once at startup by [`secrets`].
//! - The merged document is canonicalized and SHA-256 hashed so operators can
//!   tell at a glance which configuration a controller is running.
//! - [`report_unused_keys`] flags leaves no consumer reads.

mod controller;
mod layers;
pub mod secrets;
mod unused;

pub use controller::{ControllerConfig, GatewayConfig, DEFAULT_SERVICES};
pub use layers::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use unused::{
    consumed_pointers_for_mode, report_unused_keys, ConfigMode, UnusedKeyPolicy, UnusedKeyReport,
};

/// JSON pointers of every scalar leaf in `v`. Array elements count as leaves
/// under their parent (`/gateway/services/0`).
pub(crate) fn leaf_pointers(v: &serde_json::Value) -> Vec<String> {
    fn walk(v: &serde_json::Value, at: String, out: &mut Vec<String>) {
        match v {
            serde_json::Value::Object(map) => {
                for (k, child) in map {
                    let token = k.replace('~', "~0").replace('/', "~1");
                    walk(child, format!("{at}/{token}"), out);
                }
            }
            serde_json::Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(child, format!("{at}/{i}"), out);
                }
            }
            _ if at.is_empty() => out.push("/".to_string()),
            _ => out.push(at),
        }
    }
    let mut out = Vec::new();
    walk(v, String::new(), &mut out);
    out
}
