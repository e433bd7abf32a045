//! Integration tests for configuration files
//!
//! Save/load round trips through real files, partial and invalid files, and
//! merging with command-line overrides.

use server::config::{Overrides, RuntimeOptions, ServerConfig, load_config};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[server]
port = 4444
verbose = 4

[wait]
enabled = true
timeout_secs = 10
"#;

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("server.toml");

    let mut config = ServerConfig::default();
    config.server.port = 5555;
    config.wait.enabled = true;
    config.save(&path).unwrap();

    let loaded = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_parse_full_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(config.server.port, 4444);
    assert_eq!(config.server.verbose, 4);
    assert!(config.wait.enabled);
    assert_eq!(config.wait.timeout_secs, 10);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, "").unwrap();

    let config = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(config, ServerConfig::default());
}

#[test]
fn test_out_of_range_verbose_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, "[server]\nverbose = 9\n").unwrap();

    assert!(ServerConfig::load(Some(path)).is_err());
}

#[test]
fn test_malformed_file_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server.toml");
    fs::write(&path, "[server\nport = ").unwrap();

    let err = ServerConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_missing_file_rejected() {
    let dir = tempdir().unwrap();
    assert!(ServerConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_command_line_overrides_file() {
    let config: ServerConfig = toml::from_str(FULL_CONFIG).unwrap();
    let overrides = Overrides {
        port: Some(4000),
        wait_timeout_secs: Some(1),
        ..Default::default()
    };

    let options = RuntimeOptions::resolve("1234:abcd".parse().unwrap(), &config, &overrides)
        .unwrap();
    assert_eq!(options.port, 4000);
    assert_eq!(options.verbose, 4);
    assert!(options.wait_mode);
    assert_eq!(options.wait_timeout, Duration::from_secs(1));
}
