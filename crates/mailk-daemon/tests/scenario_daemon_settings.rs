//! Settings resolution: layered files, bind address precedence, and the
//! shipped base config staying in sync with what the daemon reads.

use std::io::Write;
use std::time::Duration;

use mailk_config::{report_unused_keys, ConfigMode, UnusedKeyPolicy};
use mailk_daemon::boot::{self, DaemonSettings};

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

fn path(f: &tempfile::NamedTempFile) -> String {
    f.path().to_string_lossy().into_owned()
}

#[test]
fn overlay_overrides_base() {
    let base = write_yaml("controller:\n  workers: 2\n  sync_interval_secs: 30\n");
    let overlay = write_yaml("controller:\n  workers: 8\n");

    let s = DaemonSettings::load(&[path(&base), path(&overlay)], None).unwrap();
    assert_eq!(s.controller.workers, 8);
    assert_eq!(s.controller.sync_interval, Duration::from_secs(30));
    assert_eq!(s.bind_addr, boot::default_bind_addr());
}

#[test]
fn env_address_beats_config_address() {
    let f = write_yaml("server:\n  bind_addr: \"127.0.0.1:9000\"\n");

    let from_config = DaemonSettings::load(&[path(&f)], None).unwrap();
    assert_eq!(from_config.bind_addr.port(), 9000);

    let from_env = DaemonSettings::load(&[path(&f)], Some("0.0.0.0:9100")).unwrap();
    assert_eq!(from_env.bind_addr.port(), 9100);
}

#[test]
fn bad_bind_address_fails_startup() {
    let f = write_yaml("server:\n  bind_addr: \"not-an-address\"\n");
    let err = DaemonSettings::load(&[path(&f)], None).unwrap_err();
    assert!(err.to_string().contains("CONFIG_INVALID"), "got: {err}");
}

#[test]
fn missing_layer_fails_startup() {
    assert!(DaemonSettings::load(&["/nonexistent/mailk.yaml".to_string()], None).is_err());
}

#[test]
fn shipped_base_config_is_fully_consumed() {
    let base = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/base.yaml").to_string();
    let s = DaemonSettings::load(&[base], None).unwrap();
    assert!(s.controller.gateway.base_url.is_some());

    let report = report_unused_keys(
        ConfigMode::Daemon,
        &s.loaded.config_json,
        UnusedKeyPolicy::Fail,
    )
    .unwrap();
    assert!(report.is_clean());
}
