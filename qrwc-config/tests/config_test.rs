//! Integration tests for configuration loading exercising the real
//! precedence chain (env > file > defaults) end to end, against actual
//! TOML files on disk rather than in-process structs.

use qrwc_config::schema::ConfigError;
use qrwc_config::load_config;
use std::fs;

fn temp_config_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("qrwc_config_test_{name}_{}.toml", std::process::id()))
}

#[test]
fn loads_config_from_file() {
    let path = temp_config_path("load");
    fs::write(
        &path,
        r#"
[core]
host = "192.0.2.5"
port = 1710
"#,
    )
    .expect("failed to write config file");

    let config = load_config(Some(path.clone())).expect("config should load and validate");
    assert_eq!(config.core.host, "192.0.2.5");
    assert_eq!(config.core.port, 1710);

    fs::remove_file(&path).ok();
}

#[test]
fn env_var_overrides_file_value() {
    let path = temp_config_path("env_override");
    fs::write(
        &path,
        r#"
[core]
host = "192.0.2.5"
port = 1710
"#,
    )
    .expect("failed to write config file");

    std::env::set_var("QRWC_CORE_PORT", "9999");
    let config = load_config(Some(path.clone())).expect("config should load and validate");
    assert_eq!(config.core.host, "192.0.2.5", "non-overridden value comes from file");
    assert_eq!(config.core.port, 9999, "env var must win over file value");
    std::env::remove_var("QRWC_CORE_PORT");

    fs::remove_file(&path).ok();
}

#[test]
fn defaults_apply_when_no_file_given() {
    std::env::set_var("QRWC_CORE_HOST", "default-test.example");
    let config = load_config(None).expect("default config should validate once host is set");
    assert_eq!(config.core.port, 443);
    assert!(config.core.secure);
    assert_eq!(config.rate_limit.requests_per_minute, 60);
    std::env::remove_var("QRWC_CORE_HOST");
}

#[test]
fn missing_explicit_file_reports_file_not_found() {
    let missing = std::path::PathBuf::from("/nonexistent/qrwc-config-integration-test.toml");
    let result = load_config(Some(missing));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn malformed_toml_reports_parse_error() {
    let path = temp_config_path("malformed");
    fs::write(&path, "[core\nhost = \"broken\n").expect("failed to write config file");

    let result = load_config(Some(path.clone()));
    assert!(matches!(result, Err(ConfigError::ParseError(_))));

    fs::remove_file(&path).ok();
}

#[test]
fn threshold_overrides_round_trip_through_toml() {
    let path = temp_config_path("thresholds");
    fs::write(
        &path,
        r#"
[core]
host = "192.0.2.5"

[[event_buffer.thresholds]]
pattern = "gain"
threshold = 3.0
"#,
    )
    .expect("failed to write config file");

    let config = load_config(Some(path.clone())).expect("config should load and validate");
    assert_eq!(config.event_buffer.thresholds.len(), 1);
    assert_eq!(config.event_buffer.thresholds[0].pattern, "gain");
    assert_eq!(config.event_buffer.thresholds[0].threshold, 3.0);

    fs::remove_file(&path).ok();
}
