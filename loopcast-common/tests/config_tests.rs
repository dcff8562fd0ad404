//! Configuration discovery tests
//!
//! Covers:
//! - Explicit config path loading and failure modes
//! - Default location lookup via the platform config directory
//! - Missing config falls back to defaults without error
//!
//! Tests that manipulate XDG_CONFIG_HOME are marked #[serial] so they do not
//! race each other.

use loopcast_common::config::{
    load_toml_config, resolve_toml_config, CompiledDefaults, TomlConfig,
};
use loopcast_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_explicit_path_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(
        &path,
        "crossfade_ms = 1500\n[synthesis]\nchunk_units = 4\n",
    )
    .unwrap();

    let config = resolve_toml_config(Some(&path)).unwrap();
    assert_eq!(config.crossfade_ms, Some(1500));
    assert_eq!(config.synthesis.chunk_units, Some(4));
}

#[test]
fn test_explicit_missing_path_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    let err = resolve_toml_config(Some(&path)).unwrap_err();
    match err {
        Error::Config(msg) => assert!(msg.contains("absent.toml"), "message: {}", msg),
        other => panic!("expected Config error, got {:?}", other),
    }
}

#[test]
fn test_malformed_file_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "crossfade_ms = [not a number").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_default_location_from_xdg_config_home() {
    let dir = TempDir::new().unwrap();
    let app_dir = dir.path().join("loopcast");
    fs::create_dir_all(&app_dir).unwrap();
    fs::write(app_dir.join("config.toml"), "target_duration_secs = 60\n").unwrap();

    let previous = env::var_os("XDG_CONFIG_HOME");
    env::set_var("XDG_CONFIG_HOME", dir.path());
    let result = resolve_toml_config(None);
    match previous {
        Some(value) => env::set_var("XDG_CONFIG_HOME", value),
        None => env::remove_var("XDG_CONFIG_HOME"),
    }

    let config = result.unwrap();
    assert_eq!(config.target_duration_secs, Some(60));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_missing_default_file_uses_defaults() {
    let dir = TempDir::new().unwrap();

    let previous = env::var_os("XDG_CONFIG_HOME");
    env::set_var("XDG_CONFIG_HOME", dir.path());
    let result = resolve_toml_config(None);
    match previous {
        Some(value) => env::set_var("XDG_CONFIG_HOME", value),
        None => env::remove_var("XDG_CONFIG_HOME"),
    }

    assert_eq!(result.unwrap(), TomlConfig::default());
}

#[test]
fn test_defaults_are_usable_without_file() {
    let defaults = CompiledDefaults::get();
    assert!(defaults.crossfade_ms < defaults.target_duration_secs * 1000);
    assert!(defaults.chunk_units >= 1);
    assert!(!defaults.ffmpeg_path.is_empty());
}
