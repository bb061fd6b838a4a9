use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn yaml(body: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

fn hash_of(paths: &[&std::path::Path]) -> String {
    let mut cmd = Command::cargo_bin("mailk").unwrap();
    cmd.arg("config-hash");
    for p in paths {
        cmd.arg(p);
    }
    let out = cmd.assert().success().get_output().stdout.clone();
    let text = String::from_utf8(out).unwrap();
    text.lines()
        .next()
        .and_then(|l| l.strip_prefix("config_hash="))
        .unwrap()
        .to_string()
}

#[test]
fn hash_is_stable_under_key_order() {
    let a = yaml("controller:\n  workers: 2\n  sync_interval_secs: 60\n");
    let b = yaml("controller:\n  sync_interval_secs: 60\n  workers: 2\n");
    assert_eq!(hash_of(&[a.path()]), hash_of(&[b.path()]));
}

#[test]
fn overlay_changes_hash_and_canonical_json() {
    let base = yaml("controller:\n  workers: 2\n");
    let overlay = yaml("controller:\n  workers: 8\n");
    assert_ne!(hash_of(&[base.path()]), hash_of(&[base.path(), overlay.path()]));

    Command::cargo_bin("mailk")
        .unwrap()
        .args([
            "config-hash",
            base.path().to_str().unwrap(),
            overlay.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"workers\":8"));
}

#[test]
fn requires_at_least_one_path() {
    Command::cargo_bin("mailk")
        .unwrap()
        .arg("config-hash")
        .assert()
        .failure();
}
