//! Configuration parsing and validation tests
//!
//! Tests focus on BEHAVIOR: which command lines are accepted, which identity
//! they resolve to, and which errors are reported at startup.

use clap::Parser;
use edge_adapter::adapter::IdentityKind;
use edge_adapter::config::{AdapterArgs, ConfigError};

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    args: AdapterArgs,
}

fn parse(argv: &[&str]) -> AdapterArgs {
    let mut full = vec!["edge-adapter"];
    full.extend_from_slice(argv);
    TestCli::try_parse_from(full).unwrap().args
}

#[test]
fn test_kebab_case_flags_parse() {
    let args = parse(&[
        "--system-key",
        "sys-key",
        "--device-name",
        "pump-7",
        "--password",
        "secret",
        "--platform-url",
        "https://platform.example.com",
        "--messaging-url",
        "platform.example.com:8883",
    ]);

    assert_eq!(args.system_key, "sys-key");
    assert_eq!(args.device_name, "pump-7");
    assert_eq!(args.active_key.as_deref(), Some("secret"));
    assert_eq!(args.platform_url, "https://platform.example.com");
    assert_eq!(args.messaging_url, "platform.example.com:8883");
}

#[test]
fn test_legacy_camel_case_flags_parse() {
    let args = parse(&[
        "--systemKey",
        "sys-key",
        "--deviceName",
        "pump-7",
        "--serviceAccount",
        "svc-pumps",
        "--serviceAccountToken",
        "tok",
        "--adapterConfigCollection",
        "pump_config",
        "--logLevel",
        "debug",
    ]);

    assert_eq!(args.service_account.as_deref(), Some("svc-pumps"));
    assert_eq!(args.service_account_token.as_deref(), Some("tok"));
    assert_eq!(args.adapter_config_collection, "pump_config");
    assert_eq!(args.log_level, "debug");
}

#[test]
fn test_defaults_applied() {
    let args = parse(&["--system-key", "sys-key", "--password", "secret"]);

    assert_eq!(args.platform_url, "http://localhost:9000");
    assert_eq!(args.messaging_url, "localhost:1883");
    assert_eq!(args.log_level, "info");
    assert_eq!(args.adapter_config_collection, "adapter_config");
    assert!(!args.fatal_on_disconnect);
    assert!(args.handshake_timeout().is_none());
}

#[test]
fn test_fatal_on_disconnect_accepts_boolish_values() {
    let args = parse(&["--fatal-on-disconnect", "true"]);
    assert!(args.fatal_on_disconnect);

    let args = parse(&["--fatalOnDisconnect", "false"]);
    assert!(!args.fatal_on_disconnect);
}

#[test]
fn test_handshake_timeout_flag() {
    let args = parse(&["--handshake-timeout-secs", "20"]);
    assert_eq!(args.handshake_timeout(), Some(std::time::Duration::from_secs(20)));
}

#[test]
fn test_missing_system_key_is_reported() {
    let args = parse(&["--password", "secret"]);
    assert_eq!(args.validate(), Err(ConfigError::MissingSystemKey));
}

#[test]
fn test_missing_password_without_service_account_is_reported() {
    let args = parse(&["--system-key", "sys-key"]);
    let err = args.credential_store().unwrap_err();

    assert_eq!(err, ConfigError::MissingDevicePassword);
    assert!(err.to_string().contains("Password"));
}

#[test]
fn test_malformed_platform_url_fails_before_any_retry() {
    let args = parse(&[
        "--system-key",
        "sys-key",
        "--password",
        "secret",
        "--platform-url",
        "platform.example.com",
    ]);

    let err = args.credential_store().unwrap_err();

    assert_eq!(err, ConfigError::InvalidPlatformUrl("platform.example.com".to_string()));
}

#[test]
fn test_service_account_without_token_is_reported() {
    let args = parse(&["--system-key", "sys-key", "--service-account", "svc-pumps"]);
    assert_eq!(args.validate(), Err(ConfigError::MissingServiceAccountToken));
}

#[test]
fn test_service_account_identity_resolved() {
    let args = parse(&[
        "--system-key",
        "sys-key",
        "--device-name",
        "pump-7",
        "--service-account",
        "svc-pumps",
        "--service-account-token",
        "tok",
    ]);

    let store = args.credential_store().unwrap();

    assert_eq!(store.identity(), IdentityKind::ServiceAccount);
    assert_eq!(store.config_lookup_name(), "svc-pumps");
    assert_eq!(store.device_name(), "pump-7");
    assert_eq!(store.addrs().system_key, "sys-key");
}

#[test]
fn test_redacted_config_renders_as_toml() {
    let args = parse(&[
        "--system-key",
        "sys-key",
        "--system-secret",
        "very-secret",
        "--password",
        "hunter2",
    ]);

    let rendered = toml::to_string_pretty(&args.redacted()).unwrap();

    assert!(rendered.contains("system_key = \"sys-key\""));
    assert!(!rendered.contains("very-secret"));
    assert!(!rendered.contains("hunter2"));
}
