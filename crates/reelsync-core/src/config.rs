//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/reelsync/config.toml)
//! 3. Environment variables (REELSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.
//!
//! Session state that the user changes while working (sync mode, enabled
//! flag, relay list) is not configuration; it lives in the preference file
//! inside `data_dir`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "REELSYNC";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (preferences, record collections)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log file (logs go to stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// The one collection whose records are exchanged with peers
    #[serde(default = "default_syncable_collection")]
    pub syncable_collection: String,

    /// Prefix of graph node names (node = prefix + collection)
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    /// Peers always dialed in addition to the configured relays
    #[serde(default)]
    pub known_peers: Vec<String>,

    /// How long a pull collects remote records
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,

    /// How long a relay probe waits for a connection
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Whether sync starts enabled on a device that never chose
    #[serde(default = "default_true")]
    pub sync_enabled_default: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_file: None,
            syncable_collection: default_syncable_collection(),
            node_prefix: default_node_prefix(),
            known_peers: Vec::new(),
            pull_timeout_ms: default_pull_timeout_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
            sync_enabled_default: true,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (REELSYNC_DATA_DIR, REELSYNC_PULL_TIMEOUT_MS,
    ///    REELSYNC_KNOWN_PEERS)
    /// 2. Config file (~/.config/reelsync/config.toml or REELSYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // REELSYNC_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // REELSYNC_PULL_TIMEOUT_MS (ignored unless it parses)
        if let Ok(val) = std::env::var(format!("{}_PULL_TIMEOUT_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.trim().parse() {
                self.pull_timeout_ms = ms;
            }
        }

        // REELSYNC_KNOWN_PEERS (comma separated, empty clears)
        if let Ok(val) = std::env::var(format!("{}_KNOWN_PEERS", ENV_PREFIX)) {
            self.known_peers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with REELSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reelsync")
            .join("config.toml")
    }

    /// Get the path to the preference file
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    /// Get the directory holding record collections
    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    /// Pull collection window
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    /// Relay probe window
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelsync")
}

fn default_syncable_collection() -> String {
    "cuttingRecords".to_string()
}

fn default_node_prefix() -> String {
    "reelsync-".to_string()
}

fn default_pull_timeout_ms() -> u64 {
    5000
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|p| p.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "REELSYNC_DATA_DIR",
        "REELSYNC_PULL_TIMEOUT_MS",
        "REELSYNC_KNOWN_PEERS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.syncable_collection, "cuttingRecords");
        assert_eq!(config.node_prefix, "reelsync-");
        assert_eq!(config.pull_timeout(), Duration::from_secs(5));
        assert!(config.sync_enabled_default);
        assert!(config.known_peers.is_empty());
        assert!(config.data_dir.ends_with("reelsync"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.preferences_path().ends_with("preferences.json"));
        assert!(config.collections_dir().ends_with("collections"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("REELSYNC_DATA_DIR", "/tmp/reelsync-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/reelsync-test"));
    }

    #[test]
    fn test_env_override_pull_timeout() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("REELSYNC_PULL_TIMEOUT_MS", "250");
        config.apply_env_overrides();
        assert_eq!(config.pull_timeout_ms, 250);

        // Garbage leaves the value alone
        env::set_var("REELSYNC_PULL_TIMEOUT_MS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.pull_timeout_ms, 250);
    }

    #[test]
    fn test_env_override_known_peers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("REELSYNC_KNOWN_PEERS", "ws://a:1, ws://b:2,");
        config.apply_env_overrides();
        assert_eq!(config.known_peers, vec!["ws://a:1", "ws://b:2"]);

        env::set_var("REELSYNC_KNOWN_PEERS", "");
        config.apply_env_overrides();
        assert!(config.known_peers.is_empty());
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/reelsync"),
            known_peers: vec!["ws://shop-relay:8765".to_string()],
            pull_timeout_ms: 1500,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("known_peers"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.known_peers, config.known_peers);
        assert_eq!(parsed.pull_timeout_ms, 1500);
    }

    #[test]
    fn test_load_from_str_fills_defaults() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            syncable_collection = "reelLabels"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.syncable_collection, "reelLabels");
        assert_eq!(config.node_prefix, "reelsync-");
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("REELSYNC_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();

        assert_eq!(config.syncable_collection, "cuttingRecords");
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_to_path_roundtrip() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("cfg").join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            probe_timeout_secs: 3,
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.probe_timeout_secs, 3);
        assert_eq!(loaded.data_dir, temp_dir.path().join("data"));
    }
}
