//! Tests for configuration loading and graceful degradation
//!
//! Uses serial_test for the tests that manipulate SFX_CONFIG so they never
//! race each other.

use serial_test::serial;
use sfx_common::config::{resolve_config_path, SfxConfig, SystemConfig, CONFIG_ENV_VAR};
use sfx_common::FadeCurve;
use std::env;
use std::io::Write;
use std::path::Path;

#[test]
fn test_full_config_parses() {
    let config = SfxConfig::from_toml(
        r#"
        [system]
        max_voices = 4
        reader_threads = 3
        update_interval_ms = 20
        update_budget_ms = 5
        log_level = "debug"

        [defaults]
        is_streaming = true
        stream_packet_duration = 0.5
        stream_read_ahead = 6
        fade_out_curve = "logarithmic"
        "#,
    )
    .unwrap();

    assert_eq!(config.system.max_voices, 4);
    assert_eq!(config.system.reader_threads, 3);
    assert_eq!(config.system.log_level, "debug");
    assert!(config.defaults.is_streaming);
    assert_eq!(config.defaults.stream_read_ahead, 6);
    assert_eq!(config.defaults.fade_out_curve, FadeCurve::Logarithmic);
}

#[test]
fn test_empty_config_is_default() {
    let config = SfxConfig::from_toml("").unwrap();
    assert_eq!(config, SfxConfig::default());
}

#[test]
fn test_out_of_range_values_are_clamped() {
    let config = SfxConfig::from_toml(
        r#"
        [system]
        max_voices = 1000
        update_interval_ms = 0
        update_budget_ms = 50

        [defaults]
        volume = 4.0
        stream_read_ahead = 99
        "#,
    )
    .unwrap();

    assert_eq!(config.system.max_voices, 256);
    assert_eq!(config.system.update_interval_ms, 1);
    assert_eq!(config.system.update_budget_ms, 1);
    assert_eq!(config.defaults.volume, 1.0);
    assert_eq!(config.defaults.stream_read_ahead, 32);
}

#[test]
fn test_malformed_toml_is_an_error() {
    assert!(SfxConfig::from_toml("[system\nmax_voices = ").is_err());
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[system]\nmax_voices = 2").unwrap();

    let config = SfxConfig::load(file.path()).unwrap();
    assert_eq!(config.system.max_voices, 2);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(SfxConfig::load(&missing).is_err());
    let config = SfxConfig::load_or_default(Some(&missing));
    assert_eq!(config.system, SystemConfig::default());
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sfx-from-env.toml");

    let resolved = resolve_config_path(Some(Path::new("/tmp/sfx-from-cli.toml")), CONFIG_ENV_VAR);
    assert_eq!(resolved.as_deref(), Some(Path::new("/tmp/sfx-from-cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sfx-from-env.toml");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    assert_eq!(resolved.as_deref(), Some(Path::new("/tmp/sfx-from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    // Falls through to the platform location, which only counts if it exists
    if let Some(path) = resolved {
        assert!(path.exists());
    }

    env::remove_var(CONFIG_ENV_VAR);
}
