//! Integration tests for bootstrap configuration loading
//!
//! Tests that touch the `CADENZA_CONFIG` environment variable are marked
//! `#[serial]` so they never run concurrently.

use cadenza_common::config::{load_toml_config, resolve_config_path, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = load_toml_config(Some(&missing)).expect("missing file must not be fatal");
    assert_eq!(config.port, 5750);
}

#[test]
fn test_no_path_uses_defaults() {
    let config = load_toml_config(None).unwrap();
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_load_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "port = 6123").unwrap();
    writeln!(file, "database_path = \"{}\"", dir.path().join("db.sqlite").display()).unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.port, 6123);
    assert_eq!(config.database_path_or_default(), dir.path().join("db.sqlite"));
}

#[test]
fn test_unparseable_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = [").unwrap();

    assert!(load_toml_config(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/cadenza-env.toml");
    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/cadenza-env.toml")));
}

#[test]
#[serial]
fn test_cli_argument_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/cadenza-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/cli.toml")), CONFIG_ENV_VAR);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(PathBuf::from("/tmp/cli.toml")));
}
