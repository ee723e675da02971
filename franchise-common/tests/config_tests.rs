//! Configuration resolution and graceful degradation tests
//!
//! Tests that touch process environment variables are marked #[serial]
//! so they never race each other.

use franchise_common::config::{
    load_or_default, load_toml_config, ConfigLoad, resolve_setting, resolve_setting_or, ConfigSource,
    TomlConfig, ENV_STREAM_URL, DEFAULT_STREAM_URL,
};
use serial_test::serial;
use std::env;
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_config_from_file() {
    let file = write_config(
        r#"
        stream_url = "http://search.local:8000"

        [logging]
        level = "debug"

        [gemini]
        api_key = "gem-key"
        model = "gemini-2.0-flash"

        [merge]
        address_matcher = "normalized"
        "#,
    );

    let config = load_toml_config(file.path()).unwrap();
    assert_eq!(config.stream_url.as_deref(), Some("http://search.local:8000"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.gemini.api_key.as_deref(), Some("gem-key"));
    assert_eq!(config.gemini.model, "gemini-2.0-flash");
    assert_eq!(config.gemini.timeout_secs, 30);
    assert_eq!(config.merge.address_matcher.as_deref(), Some("normalized"));
}

#[test]
fn test_broken_toml_is_config_error() {
    let file = write_config("stream_url = [unterminated");
    let err = load_toml_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
fn test_load_or_default_survives_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let (config, load) = load_or_default(Some(&missing));
    assert_eq!(config, TomlConfig::default());
    // Explicit path that cannot be read is reported, not silently skipped
    match load {
        ConfigLoad::Failed(e) => assert!(e.to_string().contains("nope.toml")),
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[test]
fn test_load_or_default_survives_broken_file() {
    let file = write_config("[[[");
    let (config, load) = load_or_default(Some(file.path()));
    assert_eq!(config, TomlConfig::default());
    assert!(matches!(load, ConfigLoad::Failed(_)));
}

#[test]
fn test_load_or_default_reports_loaded_path() {
    let file = write_config("stream_url = \"http://search.local:8000\"\n");
    let (config, load) = load_or_default(Some(file.path()));
    assert_eq!(config.stream_url.as_deref(), Some("http://search.local:8000"));
    match load {
        ConfigLoad::Loaded(path) => assert_eq!(path, file.path()),
        other => panic!("expected Loaded, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_cli_beats_env_and_toml() {
    env::set_var(ENV_STREAM_URL, "http://from-env:1");
    let resolved = resolve_setting(
        "stream_url",
        Some("http://from-cli:1"),
        ENV_STREAM_URL,
        Some("http://from-toml:1"),
    );
    env::remove_var(ENV_STREAM_URL);

    assert_eq!(
        resolved,
        Some(("http://from-cli:1".to_string(), ConfigSource::CommandLine))
    );
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ENV_STREAM_URL, "http://from-env:1");
    let resolved = resolve_setting("stream_url", None, ENV_STREAM_URL, Some("http://from-toml:1"));
    env::remove_var(ENV_STREAM_URL);

    assert_eq!(
        resolved,
        Some(("http://from-env:1".to_string(), ConfigSource::Environment))
    );
}

#[test]
#[serial]
fn test_blank_env_falls_through_to_toml() {
    env::set_var(ENV_STREAM_URL, "   ");
    let resolved = resolve_setting("stream_url", Some(""), ENV_STREAM_URL, Some("http://from-toml:1"));
    env::remove_var(ENV_STREAM_URL);

    assert_eq!(
        resolved,
        Some(("http://from-toml:1".to_string(), ConfigSource::TomlFile))
    );
}

#[test]
#[serial]
fn test_compiled_default_when_nothing_configured() {
    env::remove_var(ENV_STREAM_URL);
    let (value, source) =
        resolve_setting_or("stream_url", None, ENV_STREAM_URL, None, DEFAULT_STREAM_URL);
    assert_eq!(value, DEFAULT_STREAM_URL);
    assert_eq!(source, ConfigSource::Default);
}
