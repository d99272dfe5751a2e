//! Configuration for the path watcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `PATHWATCH_` and use double
//! underscores to separate nested levels:
//! - `PATHWATCH_WATCHER__SETTLE_MS=5` sets `watcher.settle_ms`
//! - `PATHWATCH_WATCHER__RENAME_RETRIES=0` sets `watcher.rename_retries`
//! - `PATHWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watcher::{RetryPolicy, WatchError};

const CONFIG_DIR: &str = ".pathwatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "PATHWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Watcher thread settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Name given to the watcher thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Quiet time before a burst of native events is resolved
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Longest a burst is held while native events keep arriving
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,

    /// Checks for the original path after a rename (0 disables)
    #[serde(default = "default_rename_retries")]
    pub rename_retries: u32,

    /// Sleep between rename checks, in microseconds
    #[serde(default = "default_rename_retry_interval_us")]
    pub rename_retry_interval_us: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `pathwatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_thread_name() -> String {
    "pathwatch-server".to_string()
}
fn default_settle_ms() -> u64 {
    20
}
fn default_max_hold_ms() -> u64 {
    250
}
fn default_rename_retries() -> u32 {
    50
}
fn default_rename_retry_interval_us() -> u64 {
    200
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            settle_ms: default_settle_ms(),
            max_hold_ms: default_max_hold_ms(),
            rename_retries: default_rename_retries(),
            rename_retry_interval_us: default_rename_retry_interval_us(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatcherConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_ms)
    }

    /// Budget for waiting on a renamed path to reappear.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.rename_retries,
            Duration::from_micros(self.rename_retry_interval_us),
        )
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, WatchError> {
        let config_path = Self::find_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores
            // stay inside field names.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(WatchError::from)
    }

    /// Find the settings file by looking for a `.pathwatch` directory
    /// from the current directory up to the root
    fn find_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WatchError::ConfigError {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| WatchError::ConfigError {
            reason: e.to_string(),
        })?;
        std::fs::write(path, toml_string).map_err(|e| WatchError::ConfigError {
            reason: format!("cannot write {}: {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.watcher.thread_name, "pathwatch-server");
        assert_eq!(settings.watcher.settle(), Duration::from_millis(20));
        assert_eq!(settings.watcher.retry_policy().attempts, 50);
        assert_eq!(
            settings.watcher.retry_policy().interval,
            Duration::from_micros(200)
        );
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[watcher]
thread_name = "custom-watch"
settle_ms = 5
rename_retries = 3
rename_retry_interval_us = 1000

[logging]
default = "info"

[logging.modules]
"pathwatch::watcher" = "trace"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.watcher.thread_name, "custom-watch");
        assert_eq!(settings.watcher.settle_ms, 5);
        assert_eq!(
            settings.watcher.retry_policy(),
            RetryPolicy::new(3, Duration::from_millis(1))
        );
        // Not in the file, keeps its default
        assert_eq!(settings.watcher.max_hold_ms, 250);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["pathwatch::watcher"], "trace");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let absent = temp_dir.path().join("absent.toml");
        let settings = Settings::load_from(absent).unwrap();
        assert_eq!(settings.watcher, WatcherConfig::default());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watcher.rename_retries = 7;
        settings.logging.default = "debug".to_string();

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.watcher.rename_retries, 7);
        assert_eq!(loaded.logging.default, "debug");
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        let content = "[watcher]\nsettle_ms = \"soon\"\n";
        fs::write(&config_path, content).unwrap();

        let result = Settings::load_from(&config_path);
        assert!(matches!(result, Err(WatchError::ConfigError { .. })));
    }
}
