//! Literal secrets in config are rejected; env var names are accepted.

use mailk_config::load_layered_yaml_from_strings;
use mailk_config::secrets::resolve_gateway_secrets;

const YAML_WITH_SECRET: &str = r#"
gateway:
  base_url: "https://provider.test/api/v1"
  keys_env:
    api_key: "sk-live-abc123secretvalue"
"#;

const YAML_WITH_ENV_NAME: &str = r#"
gateway:
  base_url: "https://provider.test/api/v1"
  keys_env:
    api_key: "MAILK_SENTINEL_NEVER_SET_KEY_Q7"
"#;

const YAML_SECRET_IN_ARRAY: &str = r#"
gateway:
  services:
    - "USPS_STANDARD"
    - "ghp_notreallyatoken123"
"#;

#[test]
fn literal_secret_is_rejected() {
    let err = load_layered_yaml_from_strings(&[YAML_WITH_SECRET]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("CONFIG_SECRET_DETECTED"), "got: {msg}");
    assert!(msg.contains("/gateway/keys_env/api_key"), "got: {msg}");
    assert!(!msg.contains("abc123secretvalue"), "value must be redacted");
}

#[test]
fn secret_nested_in_array_is_rejected() {
    let err = load_layered_yaml_from_strings(&[YAML_SECRET_IN_ARRAY]).unwrap_err();
    assert!(err.to_string().contains("/gateway/services/1"));
}

#[test]
fn env_var_names_are_accepted() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_ENV_NAME]).unwrap();
    assert_eq!(
        loaded
            .config_json
            .pointer("/gateway/keys_env/api_key")
            .and_then(|v| v.as_str()),
        Some("MAILK_SENTINEL_NEVER_SET_KEY_Q7")
    );
}

#[test]
fn required_key_missing_fails_closed_naming_the_var() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_ENV_NAME]).unwrap();
    let err = resolve_gateway_secrets(&loaded.config_json, true).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("SECRETS_MISSING"), "got: {msg}");
    assert!(msg.contains("MAILK_SENTINEL_NEVER_SET_KEY_Q7"), "got: {msg}");
}

#[test]
fn optional_key_missing_resolves_to_none() {
    let loaded = load_layered_yaml_from_strings(&[YAML_WITH_ENV_NAME]).unwrap();
    let secrets = resolve_gateway_secrets(&loaded.config_json, false).unwrap();
    assert!(secrets.api_key.is_none());
}

#[test]
fn debug_output_is_redacted() {
    let secrets = mailk_config::secrets::GatewaySecrets {
        api_key: Some("super-secret-value".to_string()),
    };
    let dbg = format!("{secrets:?}");
    assert!(dbg.contains("<REDACTED>"));
    assert!(!dbg.contains("super-secret-value"));
}
