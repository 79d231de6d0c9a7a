//! Configuration management for vibrolog.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::connectivity::probe_address;
use crate::entry::DEFAULT_MAX_NOTE_LENGTH;
use crate::error::{Error, Result};
use crate::record::Author;
use crate::sync::SyncPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "vibrolog";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "ledger.db";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "VIBROLOG_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `VIBROLOG_`, sections split on `__`)
/// 2. TOML config file at `~/.config/vibrolog/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Remote store configuration.
    pub remote: RemoteConfig,
    /// Synchronization policy.
    pub sync: SyncConfig,
    /// Connectivity probing.
    pub connectivity: ConnectivityConfig,
    /// Static operator identity.
    pub session: SessionConfig,
    /// Catalog source.
    pub catalog: CatalogConfig,
    /// Guided entry settings.
    pub entry: EntryConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the ledger database.
    /// Defaults to `~/.local/share/vibrolog/ledger.db`
    pub database_path: Option<PathBuf>,
}

/// Remote store configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the store. Unset means every capture stays local.
    pub base_url: Option<String>,
    /// Project API key.
    pub api_key: Option<String>,
    /// Access token of the signed-in user.
    pub access_token: Option<String>,
    /// Table the readings are written to.
    pub table: String,
    /// Bound on one remote request in milliseconds.
    pub timeout_ms: u64,
}

/// Synchronization policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Send captures made without a signed-in user to the remote store.
    pub allow_anonymous_remote: bool,
}

/// Connectivity probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` to probe. Defaults to the remote host.
    pub probe_address: Option<String>,
    /// Seconds between probes.
    pub probe_interval_secs: u64,
    /// Probe connect timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

/// Static operator identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// User id issued by the session provider.
    pub user_id: Option<String>,
    /// Name stamped on records.
    pub display_name: Option<String>,
}

/// Catalog source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// TOML catalog file. Unset means the built-in catalog.
    pub path: Option<PathBuf>,
}

/// Guided entry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Longest accepted note, in characters.
    pub max_note_length: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            access_token: None,
            table: "vibrate_data".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .field("table", &self.table)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_address: None,
            probe_interval_secs: 15,
            probe_timeout_ms: 3_000,
        }
    }
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            max_note_length: DEFAULT_MAX_NOTE_LENGTH,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.remote.base_url {
            if probe_address(base_url).is_none() {
                return Err(Error::config_validation(format!(
                    "remote.base_url must be an http(s) URL with a host, got '{base_url}'"
                )));
            }
        }

        if self.remote.table.trim().is_empty() {
            return Err(Error::config_validation("remote.table must not be empty"));
        }

        if self.remote.timeout_ms == 0 {
            return Err(Error::config_validation(
                "remote.timeout_ms must be greater than 0",
            ));
        }

        if self.connectivity.probe_interval_secs == 0 {
            return Err(Error::config_validation(
                "connectivity.probe_interval_secs must be greater than 0",
            ));
        }

        if self.connectivity.probe_timeout_ms == 0 {
            return Err(Error::config_validation(
                "connectivity.probe_timeout_ms must be greater than 0",
            ));
        }

        if self.entry.max_note_length == 0 {
            return Err(Error::config_validation(
                "entry.max_note_length must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Whether a remote store is configured.
    #[must_use]
    pub fn remote_enabled(&self) -> bool {
        self.remote.base_url.is_some()
    }

    /// Get the remote request timeout as a Duration.
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }

    /// Address the connectivity probe should dial, if any.
    #[must_use]
    pub fn probe_address(&self) -> Option<String> {
        self.connectivity.probe_address.clone().or_else(|| {
            self.remote
                .base_url
                .as_deref()
                .and_then(probe_address)
        })
    }

    /// Get the probe interval as a Duration.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity.probe_interval_secs)
    }

    /// Get the probe timeout as a Duration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    /// The sync policy described by this configuration.
    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            allow_anonymous_remote: self.sync.allow_anonymous_remote,
            insert_timeout: self.remote_timeout(),
        }
    }

    /// The configured operator, if a user id is set.
    #[must_use]
    pub fn author(&self) -> Option<Author> {
        self.session.user_id.as_ref().map(|id| Author {
            id: id.clone(),
            display_name: self
                .session
                .display_name
                .clone()
                .unwrap_or_else(|| id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.storage.database_path.is_none());
        assert!(!config.remote_enabled());
        assert_eq!(config.remote.table, "vibrate_data");
        assert_eq!(config.remote.timeout_ms, 10_000);
        assert!(!config.sync.allow_anonymous_remote);
        assert_eq!(config.connectivity.probe_interval_secs, 15);
        assert_eq!(config.entry.max_note_length, 500);
        assert!(config.author().is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.remote.base_url = Some("ftp://example.com".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("remote.base_url"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.remote.timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeout_ms"));
    }

    #[test]
    fn test_validate_zero_probe_interval() {
        let mut config = Config::default();
        config.connectivity.probe_interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("probe_interval_secs"));
    }

    #[test]
    fn test_validate_empty_table() {
        let mut config = Config::default();
        config.remote.table = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_note_length() {
        let mut config = Config::default();
        config.entry.max_note_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("ledger.db"));
        assert!(path.to_string_lossy().contains("vibrolog"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_probe_address_derived_from_remote() {
        let mut config = Config::default();
        assert!(config.probe_address().is_none());

        config.remote.base_url = Some("https://abc.supabase.co".to_string());
        assert_eq!(config.probe_address().as_deref(), Some("abc.supabase.co:443"));

        config.connectivity.probe_address = Some("10.1.1.1:53".to_string());
        assert_eq!(config.probe_address().as_deref(), Some("10.1.1.1:53"));
    }

    #[test]
    fn test_sync_policy() {
        let mut config = Config::default();
        config.sync.allow_anonymous_remote = true;
        config.remote.timeout_ms = 2_500;

        let policy = config.sync_policy();
        assert!(policy.allow_anonymous_remote);
        assert_eq!(policy.insert_timeout, Duration::from_millis(2_500));
    }

    #[test]
    fn test_author_falls_back_to_id() {
        let mut config = Config::default();
        config.session.user_id = Some("op-9".to_string());
        assert_eq!(config.author().unwrap().display_name, "op-9");

        config.session.display_name = Some("Night Shift".to_string());
        assert_eq!(config.author().unwrap().display_name, "Night Shift");
    }

    #[test]
    fn test_remote_debug_redacts_secrets() {
        let mut config = Config::default();
        config.remote.api_key = Some("super-secret".to_string());
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("vibrolog_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[remote]
base_url = "https://plant.example.com"
timeout_ms = 4000

[sync]
allow_anonymous_remote = true

[entry]
max_note_length = 120
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.remote.base_url.as_deref(), Some("https://plant.example.com"));
        assert_eq!(config.remote.timeout_ms, 4_000);
        assert_eq!(config.remote.table, "vibrate_data");
        assert!(config.sync.allow_anonymous_remote);
        assert_eq!(config.entry.max_note_length, 120);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("vibrolog"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("allow_anonymous_remote"));
        assert!(json.contains("max_note_length"));
    }
}
