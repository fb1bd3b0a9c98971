//! Credential resolution for lcnn-bot
//!
//! Provides multi-tier resolution with ENV → TOML → legacy `creds.json` priority.

use lcnn_common::config::TomlConfig;
use lcnn_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const CONSUMER_TOKEN_ENV: &str = "LCNN_CONSUMER_TOKEN";
pub const CONSUMER_SECRET_ENV: &str = "LCNN_CONSUMER_SECRET";
pub const GENAI_KEY_ENV: &str = "GOOGLE_GENAI";

/// Legacy credential file name, looked up in the root folder
pub const LEGACY_CREDS_FILE: &str = "creds.json";

/// OAuth2 owner-only consumer for the knowledge base
#[derive(Clone, PartialEq, Eq)]
pub struct WikibaseCredentials {
    pub consumer_token: String,
    pub consumer_secret: String,
}

impl std::fmt::Debug for WikibaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikibaseCredentials")
            .field("consumer_token", &self.consumer_token)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LegacyCreds {
    consumer_token: String,
    consumer_secret: String,
}

/// Resolve knowledge-base credentials
///
/// **Priority:** ENV → TOML → `<root>/creds.json`
pub fn resolve_wikibase_credentials(toml_config: &TomlConfig, root: &Path) -> Result<WikibaseCredentials> {
    let mut sources = Vec::new();

    let env_creds = pair(
        std::env::var(CONSUMER_TOKEN_ENV).ok(),
        std::env::var(CONSUMER_SECRET_ENV).ok(),
    );
    if env_creds.is_some() {
        sources.push("environment");
    }

    let toml_creds = pair(
        toml_config.wikibase.consumer_token.clone(),
        toml_config.wikibase.consumer_secret.clone(),
    );
    if toml_creds.is_some() {
        sources.push("TOML");
    }

    let legacy_path = root.join(LEGACY_CREDS_FILE);
    let legacy_creds = read_legacy_creds(&legacy_path)?;
    if legacy_creds.is_some() {
        sources.push("creds.json");
    }

    if sources.len() > 1 {
        warn!(
            "Wikibase credentials found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(creds) = env_creds.or(toml_creds).or(legacy_creds) {
        info!(source = sources[0], "Wikibase credentials loaded");
        return Ok(creds);
    }

    Err(Error::Config(format!(
        "Wikibase OAuth2 credentials not configured. Please configure using one of:\n\
         1. Environment: {}=... and {}=...\n\
         2. TOML config: [wikibase] consumer_token / consumer_secret\n\
         3. Legacy file: {}\n\
         \n\
         Or pass --dry-run to run without writing.",
        CONSUMER_TOKEN_ENV,
        CONSUMER_SECRET_ENV,
        legacy_path.display()
    )))
}

/// Resolve the language model API key
///
/// **Priority:** ENV → TOML
pub fn resolve_genai_api_key(toml_config: &TomlConfig) -> Result<String> {
    let env_key = std::env::var(GENAI_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config.ai.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Gemini API key found in environment and TOML. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("Gemini API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Gemini API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Gemini API key not configured. Set {} or [ai] api_key, or pass --no-ai.",
        GENAI_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn pair(token: Option<String>, secret: Option<String>) -> Option<WikibaseCredentials> {
    match (token, secret) {
        (Some(t), Some(s)) if is_valid_key(&t) && is_valid_key(&s) => Some(WikibaseCredentials {
            consumer_token: t.trim().to_string(),
            consumer_secret: s.trim().to_string(),
        }),
        _ => None,
    }
}

fn read_legacy_creds(path: &Path) -> Result<Option<WikibaseCredentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let creds: LegacyCreds = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Could not parse {}: {}", path.display(), e)))?;
    Ok(pair(Some(creds.consumer_token), Some(creds.consumer_secret)))
}
