//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "LCNN_ROOT_FOLDER";

/// Ledger database file name inside the root folder
pub const LEDGER_FILE_NAME: &str = "ids.sqlite3";

const BOT_CONTACT: &str = "https://www.wikidata.org/wiki/User:LCNNBot";

/// User agent sent with every outbound HTTP request
pub fn get_user_agent() -> String {
    format!("LCNNBot/{} ({})", env!("CARGO_PKG_VERSION"), BOT_CONTACT)
}

/// Complete TOML configuration file (`~/.config/lcnn/<module>.toml`)
///
/// Every section is optional; missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Folder holding the ledger database and reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub wikibase: WikibaseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Knowledge-base endpoints, credentials and the tracked property ids
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WikibaseConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_sparql_url")]
    pub sparql_url: String,
    #[serde(default = "default_entity_data_url")]
    pub entity_data_url: String,
    #[serde(default = "default_oauth_token_url")]
    pub oauth_token_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_secret: Option<String>,
    /// Tracked identifier property (LCCN)
    #[serde(default = "default_identifier_property")]
    pub identifier_property: String,
    /// "Subject named as" qualifier
    #[serde(default = "default_named_as_qualifier")]
    pub named_as_qualifier: String,
    /// Cross-reference identifier property (VIAF)
    #[serde(default = "default_cross_reference_property")]
    pub cross_reference_property: String,
    /// Item cited as "stated in" on new claims (LC Name Authority File)
    #[serde(default = "default_stated_in_item")]
    pub stated_in_item: String,
    /// Requests per second against the Action API
    #[serde(default = "default_api_rate")]
    pub requests_per_second: u32,
}

impl Default for WikibaseConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            sparql_url: default_sparql_url(),
            entity_data_url: default_entity_data_url(),
            oauth_token_url: default_oauth_token_url(),
            consumer_token: None,
            consumer_secret: None,
            identifier_property: default_identifier_property(),
            named_as_qualifier: default_named_as_qualifier(),
            cross_reference_property: default_cross_reference_property(),
            stated_in_item: default_stated_in_item(),
            requests_per_second: default_api_rate(),
        }
    }
}

/// Authority-file change feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Base of the paged activity stream; pages are `<base>/<n>.json`
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    /// How far back (in pages) a run walks
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_feed_rate")]
    pub requests_per_second: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_url(),
            max_pages: default_max_pages(),
            requests_per_second: default_feed_rate(),
        }
    }
}

/// Language-model matcher settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_genai_url")]
    pub base_url: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: default_model(),
            base_url: default_genai_url(),
        }
    }
}

/// Worker pool, retry and retention tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,
    /// Pause before re-querying the knowledge base after writes
    #[serde(default = "default_consistency_delay_secs")]
    pub consistency_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retention_days: default_retention_days(),
            transient_attempts: default_transient_attempts(),
            consistency_delay_secs: default_consistency_delay_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_api_url() -> String {
    "https://www.wikidata.org/w/api.php".to_string()
}
fn default_sparql_url() -> String {
    "https://query.wikidata.org/sparql".to_string()
}
fn default_entity_data_url() -> String {
    "https://www.wikidata.org/wiki/Special:EntityData".to_string()
}
fn default_oauth_token_url() -> String {
    "https://meta.wikimedia.org/w/rest.php/oauth2/access_token".to_string()
}
fn default_identifier_property() -> String {
    "P244".to_string()
}
fn default_named_as_qualifier() -> String {
    "P1810".to_string()
}
fn default_cross_reference_property() -> String {
    "P214".to_string()
}
fn default_stated_in_item() -> String {
    "Q18912790".to_string()
}
fn default_api_rate() -> u32 {
    5
}
fn default_feed_url() -> String {
    "https://id.loc.gov/authorities/names/activitystreams/feed".to_string()
}
fn default_max_pages() -> u32 {
    49
}
fn default_feed_rate() -> u32 {
    4
}
fn default_true() -> bool {
    true
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_genai_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_retention_days() -> i64 {
    30
}
fn default_transient_attempts() -> u32 {
    3
}
fn default_consistency_delay_secs() -> u64 {
    5
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `LCNN_ROOT_FOLDER`
/// 3. TOML `root_folder`
/// 4. OS-dependent default
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            debug!(module = %self.module_name, "Root folder from TOML config");
            return path.clone();
        }

        default_root_folder()
    }
}

/// Creates the root folder and hands out paths inside it
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            tracing::info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE_NAME)
    }

    /// Default report location: `<root>/reports/<YYYY-MM-DD>.xml`
    pub fn report_path(&self, day: chrono::NaiveDate) -> PathBuf {
        self.root
            .join("reports")
            .join(format!("{}.xml", day.format("%Y-%m-%d")))
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lcnn"))
        .unwrap_or_else(|| PathBuf::from("./lcnn_data"))
}

/// Per-module config file location: `<config_dir>/lcnn/<module>.toml`
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lcnn").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file.
///
/// A missing file is not an error: defaults are returned with a warning.
/// A present but unparsable file is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!("Config file not found, using defaults: {}", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;

    // File may hold consumer secrets
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_names_bot() {
        let ua = get_user_agent();
        assert!(ua.starts_with("LCNNBot/"));
        assert!(ua.contains("User:LCNNBot"));
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.pipeline.retention_days, 30);
        assert_eq!(config.wikibase.identifier_property, "P244");
        assert_eq!(config.wikibase.named_as_qualifier, "P1810");
        assert!(config.ai.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.transient_attempts, 3);
        assert_eq!(config.feed.max_pages, 49);
    }

    #[test]
    fn test_report_path_layout() {
        let init = RootFolderInitializer::new(PathBuf::from("/data/lcnn"));
        let day = chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(
            init.report_path(day),
            PathBuf::from("/data/lcnn/reports/2026-10-19.xml")
        );
        assert_eq!(init.ledger_path(), PathBuf::from("/data/lcnn/ids.sqlite3"));
    }
}
