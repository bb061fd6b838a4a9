use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

const VALID: &str = r#"
metadata:
  name: letter
  namespace: billing
spec:
  service: USPS_CERTIFIED
  url: https://example.com/invoice.pdf
  to: { name: Ada, address1: 1 Main St, city: Austin, state: TX, postcode: "78701", country: US }
  from: { name: Bob, address1: 2 Elm St, city: Dallas, state: TX, postcode: "75201", country: US }
"#;

fn manifest(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

#[test]
fn valid_manifest_passes_with_default_catalog() {
    let m = manifest(VALID);
    Command::cargo_bin("mailk")
        .unwrap()
        .args(["validate", m.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok billing/letter"));
}

#[test]
fn invalid_manifest_lists_every_violation_and_fails() {
    let m = manifest("metadata: { name: bare }\nspec: { service: CARRIER_PIGEON }\n");
    Command::cargo_bin("mailk")
        .unwrap()
        .args(["validate", m.path().to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid default/bare"))
        .stdout(predicate::str::contains("spec.service: unrecognized service"))
        .stdout(predicate::str::contains("spec.documentSource"))
        .stdout(predicate::str::contains("spec.to.name: required"))
        .stdout(predicate::str::contains("spec.from.postcode: required"))
        .stderr(predicate::str::contains("VALIDATION_FAILED: 1 of 1"));
}

#[test]
fn config_catalog_replaces_default_services() {
    let m = manifest(VALID);
    let mut cfg = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    cfg.write_all(b"gateway:\n  services: [USPS_STANDARD]\n").unwrap();

    Command::cargo_bin("mailk")
        .unwrap()
        .args([
            "validate",
            m.path().to_str().unwrap(),
            "--config",
            cfg.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "spec.service: unrecognized service 'USPS_CERTIFIED'",
        ));
}

#[test]
fn missing_manifest_file_is_an_error() {
    Command::cargo_bin("mailk")
        .unwrap()
        .args(["validate", "/nonexistent/manifest.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read manifest"));
}
