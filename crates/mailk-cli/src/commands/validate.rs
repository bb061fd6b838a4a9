//! `mailk validate`: offline check of MailRequest manifests.
//!
//! A manifest file may hold several YAML documents separated by `---`.
//! Each one is built into an order payload and validated exactly as the
//! controller would before contacting the provider.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use mailk_execution::{build, validate, FieldViolation, ServiceCatalog};
use mailk_schemas::MailSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub metadata: ManifestMeta,
    #[serde(default)]
    pub spec: MailSpec,
}

#[derive(Debug, Deserialize)]
pub struct ManifestMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug)]
pub struct Verdict {
    pub record: String,
    pub violations: Vec<FieldViolation>,
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn parse_manifests(raw: &str) -> Result<Vec<Manifest>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(raw).enumerate() {
        let value = serde_yaml::Value::deserialize(doc)
            .with_context(|| format!("invalid yaml in document {i}"))?;
        if value.is_null() {
            continue;
        }
        let m: Manifest = serde_yaml::from_value(value)
            .with_context(|| format!("document {i} is not a MailRequest manifest"))?;
        out.push(m);
    }
    Ok(out)
}

pub fn check(manifest: &Manifest, catalog: &ServiceCatalog) -> Verdict {
    let violations = match validate(&build(&manifest.spec), catalog) {
        Ok(()) => Vec::new(),
        Err(failure) => failure.violations,
    };
    Verdict {
        record: format!("{}/{}", manifest.metadata.namespace, manifest.metadata.name),
        violations,
    }
}

pub fn render(v: &Verdict) -> String {
    if v.is_ok() {
        return format!("ok {}\n", v.record);
    }
    let mut s = format!("invalid {}\n", v.record);
    for violation in &v.violations {
        let _ = writeln!(s, "  {}: {}", violation.field, violation.reason);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
metadata:
  name: letter
spec:
  service: USPS_STANDARD
  url: https://example.com/letter.pdf
  to: { name: Ada, address1: 1 Main St, city: Austin, state: TX, postcode: "78701", country: US }
  from: { name: Bob, address1: 2 Elm St, city: Dallas, state: TX, postcode: "75201", country: US }
"#;

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::new(["USPS_STANDARD"])
    }

    #[test]
    fn valid_manifest_defaults_namespace() {
        let docs = parse_manifests(VALID).unwrap();
        assert_eq!(docs.len(), 1);
        let v = check(&docs[0], &catalog());
        assert!(v.is_ok(), "{:?}", v.violations);
        assert_eq!(render(&v), "ok default/letter\n");
    }

    #[test]
    fn every_violation_is_listed() {
        let raw = "metadata: { name: bare, namespace: ops }\nspec: { service: TELEGRAM }\n";
        let docs = parse_manifests(raw).unwrap();
        let v = check(&docs[0], &catalog());
        let out = render(&v);
        assert!(out.starts_with("invalid ops/bare\n"));
        assert!(out.contains("spec.service: unrecognized service 'TELEGRAM'"));
        assert!(out.contains("spec.documentSource"));
        assert!(out.contains("spec.to.city: required"));
        assert!(out.contains("spec.from.country: required"));
    }

    #[test]
    fn multi_document_files_are_split() {
        let raw = format!("{VALID}\n---\nmetadata: {{ name: second }}\n---\n");
        let docs = parse_manifests(&raw).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].metadata.name, "second");
    }

    #[test]
    fn manifest_without_metadata_is_an_error() {
        assert!(parse_manifests("spec: { service: USPS_STANDARD }\n").is_err());
    }
}
