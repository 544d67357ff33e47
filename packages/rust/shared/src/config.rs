//! Application configuration for civicetl.
//!
//! User config lives at `~/.civicetl/civicetl.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CivicError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "civicetl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".civicetl";

// ---------------------------------------------------------------------------
// Config structs (matching civicetl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Open data catalog settings.
    #[serde(default)]
    pub open_data: OpenDataConfig,

    /// Council agenda-item API settings.
    #[serde(default)]
    pub council: CouncilConfig,

    /// Timeouts and retry policy shared by every outbound request.
    #[serde(default)]
    pub http: HttpConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "var/civicetl.db".into()
}

/// `[open_data]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDataConfig {
    /// CKAN base URL. Dataset downloads must share this origin.
    #[serde(default = "default_open_data_url")]
    pub base_url: String,

    /// Catalog id of the councillor contact dataset.
    #[serde(default = "default_contact_catalog")]
    pub contact_catalog_id: String,

    /// Catalog id of the voting record dataset.
    #[serde(default = "default_vote_catalog")]
    pub vote_catalog_id: String,
}

impl Default for OpenDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_open_data_url(),
            contact_catalog_id: default_contact_catalog(),
            vote_catalog_id: default_vote_catalog(),
        }
    }
}

fn default_open_data_url() -> String {
    "https://ckan0.cf.opendata.inter.prod-toronto.ca".into()
}
fn default_contact_catalog() -> String {
    "elected-officials-contact-information".into()
}
fn default_vote_catalog() -> String {
    "members-of-toronto-city-council-voting-record".into()
}

/// `[council]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    /// Base URL of the council API host.
    #[serde(default = "default_council_url")]
    pub base_url: String,

    /// Records requested per agenda-item page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Agenda pages fetched at once after the first.
    #[serde(default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: usize,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            base_url: default_council_url(),
            page_size: default_page_size(),
            max_concurrent_pages: default_max_concurrent_pages(),
        }
    }
}

fn default_council_url() -> String {
    "https://secure.toronto.ca".into()
}
fn default_page_size() -> u32 {
    200
}
fn default_max_concurrent_pages() -> usize {
    4
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts after a transient failure (5xx, timeout, connect error).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on a single backoff.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    10_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.civicetl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CivicError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.civicetl/civicetl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CivicError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CivicError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CivicError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| CivicError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CivicError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("contact_catalog_id"));
        assert!(toml_str.contains("secure.toronto.ca"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[database]
path = "/tmp/council.db"

[http]
max_retries = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.database.path, "/tmp/council.db");
        assert_eq!(config.http.max_retries, 0);
        assert_eq!(config.http.timeout_secs, 60);
        assert_eq!(config.council.page_size, 200);
        assert_eq!(config.council.max_concurrent_pages, 4);
        assert_eq!(
            config.open_data.vote_catalog_id,
            "members-of-toronto-city-council-voting-record"
        );
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("civicetl-does-not-exist.toml");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, CivicError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let path = std::env::temp_dir().join(format!(
            "civicetl-bad-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[database\npath = 3").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().starts_with("config error"));
        let _ = std::fs::remove_file(&path);
    }
}
