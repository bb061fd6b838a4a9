use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::leaf_pointers;

/// Prefixes of credentials that must never appear as literal config values.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Effective configuration after merging every layer.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// SHA-256 (hex) of `canonical_json`.
    pub config_hash: String,
    /// Compact JSON with keys in sorted order.
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}")))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (layer, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {layer}"))?;
        let doc = serde_json::to_value(doc).context("yaml->json conversion failed")?;
        overlay(&mut merged, doc);
    }

    reject_secret_literals(&merged)?;

    // serde_json's default Map keeps keys sorted.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; any other value replaces what is below it.
/// A null layer (empty document) changes nothing.
fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (_, Value::Null) => {}
        (Value::Object(below), Value::Object(above)) => {
            for (k, v) in above {
                overlay(below.entry(k).or_insert(Value::Null), v);
            }
        }
        (slot, v) => *slot = v,
    }
}

fn reject_secret_literals(v: &Value) -> Result<()> {
    for ptr in leaf_pointers(v) {
        let Some(s) = v.pointer(&ptr).and_then(Value::as_str) else {
            continue;
        };
        let s = s.trim();
        if s.len() >= 8 && SECRET_PREFIXES.iter().any(|p| s.starts_with(p)) {
            bail!("CONFIG_SECRET_DETECTED leaf={ptr} value=REDACTED");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_overlay_document_keeps_base() {
        let loaded = load_layered_yaml_from_strings(&["controller:\n  workers: 2\n", ""]).unwrap();
        assert_eq!(loaded.config_json.pointer("/controller/workers").unwrap(), 2);
    }

    #[test]
    fn overlay_replaces_lists_whole() {
        let loaded = load_layered_yaml_from_strings(&[
            "gateway:\n  services: [A, B]\n  timeout_secs: 5\n",
            "gateway:\n  services: [C]\n",
        ])
        .unwrap();
        assert_eq!(
            loaded.config_json.pointer("/gateway/services").unwrap(),
            &serde_json::json!(["C"])
        );
        assert_eq!(loaded.config_json.pointer("/gateway/timeout_secs").unwrap(), 5);
    }

    #[test]
    fn short_values_are_not_secrets() {
        assert!(load_layered_yaml_from_strings(&["tag: sk-1\n"]).is_ok());
        assert!(load_layered_yaml_from_strings(&["tag: sk-live-abcdefgh\n"]).is_err());
    }
}
