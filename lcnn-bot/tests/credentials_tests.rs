//! Credential resolution priority (ENV → TOML → creds.json)
//!
//! Tests touching the credential variables are marked #[serial].

use lcnn_bot::config::{
    resolve_genai_api_key, resolve_wikibase_credentials, CONSUMER_SECRET_ENV, CONSUMER_TOKEN_ENV, GENAI_KEY_ENV,
    LEGACY_CREDS_FILE,
};
use lcnn_common::config::TomlConfig;
use serial_test::serial;
use std::env;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(CONSUMER_TOKEN_ENV);
    env::remove_var(CONSUMER_SECRET_ENV);
    env::remove_var(GENAI_KEY_ENV);
}

fn toml_with_credentials() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.wikibase.consumer_token = Some("toml-token".to_string());
    config.wikibase.consumer_secret = Some("toml-secret".to_string());
    config
}

#[test]
#[serial]
fn test_missing_credentials_is_config_error() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let err = resolve_wikibase_credentials(&TomlConfig::default(), temp_dir.path()).unwrap_err();
    assert!(matches!(err, lcnn_common::Error::Config(_)));
    assert!(err.to_string().contains("--dry-run"));
}

#[test]
#[serial]
fn test_env_beats_toml() {
    clear_env();
    env::set_var(CONSUMER_TOKEN_ENV, "env-token");
    env::set_var(CONSUMER_SECRET_ENV, "env-secret");
    let temp_dir = TempDir::new().unwrap();

    let creds = resolve_wikibase_credentials(&toml_with_credentials(), temp_dir.path()).unwrap();
    assert_eq!(creds.consumer_token, "env-token");
    assert_eq!(creds.consumer_secret, "env-secret");

    clear_env();
}

#[test]
#[serial]
fn test_half_set_env_falls_through_to_toml() {
    clear_env();
    env::set_var(CONSUMER_TOKEN_ENV, "env-token");
    let temp_dir = TempDir::new().unwrap();

    let creds = resolve_wikibase_credentials(&toml_with_credentials(), temp_dir.path()).unwrap();
    assert_eq!(creds.consumer_token, "toml-token");

    clear_env();
}

#[test]
#[serial]
fn test_legacy_creds_file_is_last_resort() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(LEGACY_CREDS_FILE),
        r#"{"consumer_token": "file-token", "consumer_secret": "file-secret"}"#,
    )
    .unwrap();

    let creds = resolve_wikibase_credentials(&TomlConfig::default(), temp_dir.path()).unwrap();
    assert_eq!(creds.consumer_token, "file-token");

    let creds = resolve_wikibase_credentials(&toml_with_credentials(), temp_dir.path()).unwrap();
    assert_eq!(creds.consumer_token, "toml-token");
}

#[test]
#[serial]
fn test_unparsable_creds_file_is_error() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(LEGACY_CREDS_FILE), "not json").unwrap();

    assert!(resolve_wikibase_credentials(&TomlConfig::default(), temp_dir.path()).is_err());
}

#[test]
#[serial]
fn test_genai_key_resolution() {
    clear_env();
    let mut config = TomlConfig::default();
    assert!(resolve_genai_api_key(&config).is_err());

    config.ai.api_key = Some("toml-key".to_string());
    assert_eq!(resolve_genai_api_key(&config).unwrap(), "toml-key");

    env::set_var(GENAI_KEY_ENV, "env-key");
    assert_eq!(resolve_genai_api_key(&config).unwrap(), "env-key");

    env::set_var(GENAI_KEY_ENV, "  ");
    assert_eq!(resolve_genai_api_key(&config).unwrap(), "toml-key");

    clear_env();
}
