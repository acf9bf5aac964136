//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/ricecooker/config.toml)
//! 3. Environment variables (RICECOOKER_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::CommandWire;
use crate::sync::SyncOptions;

/// Environment variable prefix
const ENV_PREFIX: &str = "RICECOOKER";

const DEBOUNCE_MS_RANGE: RangeInclusive<u64> = 50..=10_000;
const COMMAND_TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 1..=300;
const PROGRESS_TICK_MS_RANGE: RangeInclusive<u64> = 50..=10_000;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Realtime database URL, e.g. `https://my-project.firebaseio.com`
    pub database_url: Option<String>,

    /// Database auth token (ID token or legacy secret)
    pub auth_token: Option<String>,

    /// Signed-in user, for device linking
    pub user_id: Option<String>,

    /// Device to use when a command does not name one
    pub device_id: Option<String>,

    /// How commands are written to the device record
    pub command_wire: CommandWire,

    pub settings_debounce_ms: u64,

    pub command_timeout_secs: u64,

    pub progress_tick_ms: u64,

    /// Log filter, e.g. `info` or `ricecooker_core=debug`
    pub log_level: String,

    /// Write logs here instead of stderr
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let options = SyncOptions::default();
        Self {
            database_url: None,
            auth_token: None,
            user_id: None,
            device_id: None,
            command_wire: options.command_wire,
            settings_debounce_ms: options.settings_debounce.as_millis() as u64,
            command_timeout_secs: options.command_timeout.as_secs(),
            progress_tick_ms: options.progress_tick.as_millis() as u64,
            log_level: "warn".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (RICECOOKER_DATABASE_URL, RICECOOKER_DEVICE_ID, ...)
    /// 2. Config file (~/.config/ricecooker/config.toml or RICECOOKER_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` when given, otherwise from the default location
    pub fn load_with_cli_override(path: Option<&Path>) -> Result<Self> {
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

        config.apply_env_overrides()?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        let var = |name: &str| std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok();
        // Empty strings clear optional values
        let optional = |val: String| if val.is_empty() { None } else { Some(val) };

        if let Some(val) = var("DATABASE_URL") {
            self.database_url = optional(val);
        }
        if let Some(val) = var("AUTH_TOKEN") {
            self.auth_token = optional(val);
        }
        if let Some(val) = var("USER_ID") {
            self.user_id = optional(val);
        }
        if let Some(val) = var("DEVICE_ID") {
            self.device_id = optional(val);
        }
        if let Some(val) = var("COMMAND_WIRE") {
            self.command_wire = val
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid RICECOOKER_COMMAND_WIRE")?;
        }
        if let Some(val) = var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = var("LOG_FILE") {
            self.log_file = optional(val).map(PathBuf::from);
        }
        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with RICECOOKER_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ricecooker")
            .join("config.toml")
    }

    /// Check the timing values
    pub fn validate(&self) -> Result<()> {
        check_range(
            "settings_debounce_ms",
            self.settings_debounce_ms,
            &DEBOUNCE_MS_RANGE,
        )?;
        check_range(
            "command_timeout_secs",
            self.command_timeout_secs,
            &COMMAND_TIMEOUT_SECS_RANGE,
        )?;
        check_range(
            "progress_tick_ms",
            self.progress_tick_ms,
            &PROGRESS_TICK_MS_RANGE,
        )?;
        Ok(())
    }

    /// Timing and wire options for the synchronizer
    ///
    /// Timing values outside their ranges are clamped.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            settings_debounce: Duration::from_millis(clamp(
                self.settings_debounce_ms,
                &DEBOUNCE_MS_RANGE,
            )),
            command_timeout: Duration::from_secs(clamp(
                self.command_timeout_secs,
                &COMMAND_TIMEOUT_SECS_RANGE,
            )),
            progress_tick: Duration::from_millis(clamp(
                self.progress_tick_ms,
                &PROGRESS_TICK_MS_RANGE,
            )),
            command_wire: self.command_wire,
        }
    }

    /// Set a key from its string form, as `config set` does
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = || {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };
        let number = |key: &str, range: &RangeInclusive<u64>| -> Result<u64> {
            let n = value
                .parse()
                .with_context(|| format!("{} must be a whole number, got '{}'", key, value))?;
            check_range(key, n, range)?;
            Ok(n)
        };

        match key {
            "database_url" => self.database_url = optional(),
            "auth_token" => self.auth_token = optional(),
            "user_id" => self.user_id = optional(),
            "device_id" => self.device_id = optional(),
            "command_wire" => {
                self.command_wire = value.parse().map_err(anyhow::Error::msg)?;
            }
            "settings_debounce_ms" => {
                self.settings_debounce_ms = number(key, &DEBOUNCE_MS_RANGE)?
            }
            "command_timeout_secs" => {
                self.command_timeout_secs = number(key, &COMMAND_TIMEOUT_SECS_RANGE)?
            }
            "progress_tick_ms" => self.progress_tick_ms = number(key, &PROGRESS_TICK_MS_RANGE)?,
            "log_level" => self.log_level = value.to_string(),
            "log_file" => self.log_file = optional().map(PathBuf::from),
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                Self::KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Keys accepted by [`Config::set_value`]
    pub const KEYS: &'static [&'static str] = &[
        "database_url",
        "auth_token",
        "user_id",
        "device_id",
        "command_wire",
        "settings_debounce_ms",
        "command_timeout_secs",
        "progress_tick_ms",
        "log_level",
        "log_file",
    ];
}

fn check_range(key: &str, value: u64, range: &RangeInclusive<u64>) -> Result<()> {
    if !range.contains(&value) {
        anyhow::bail!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        );
    }
    Ok(())
}

fn clamp(value: u64, range: &RangeInclusive<u64>) -> u64 {
    value.clamp(*range.start(), *range.end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
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
        "RICECOOKER_DATABASE_URL",
        "RICECOOKER_AUTH_TOKEN",
        "RICECOOKER_USER_ID",
        "RICECOOKER_DEVICE_ID",
        "RICECOOKER_COMMAND_WIRE",
        "RICECOOKER_LOG_LEVEL",
        "RICECOOKER_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.settings_debounce_ms, 400);
        assert_eq!(config.command_timeout_secs, 8);
        assert_eq!(config.progress_tick_ms, 500);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.sync_options(), SyncOptions::default());
    }

    #[test]
    fn test_env_override_device() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("RICECOOKER_DEVICE_ID", "cooker-001");
        env::set_var("RICECOOKER_COMMAND_WIRE", "queue");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.device_id.as_deref(), Some("cooker-001"));
        assert_eq!(config.command_wire, CommandWire::Queue);

        // Empty string clears it
        env::set_var("RICECOOKER_DEVICE_ID", "");
        config.apply_env_overrides().unwrap();
        assert!(config.device_id.is_none());
    }

    #[test]
    fn test_env_override_rejects_bad_wire() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("RICECOOKER_COMMAND_WIRE", "smoke-signals");
        assert!(Config::load_from_str("").is_err());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            database_url = "https://cooker.example.com"
            device_id = "cooker-001"
            command_wire = "single"
            command_timeout_secs = 5
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("https://cooker.example.com")
        );
        assert_eq!(config.command_wire, CommandWire::Single);
        assert_eq!(
            config.sync_options().command_timeout,
            Duration::from_secs(5)
        );
        // Unset keys keep their defaults
        assert_eq!(config.settings_debounce_ms, 400);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set_value("device_id", "cooker-002").unwrap();
        config.set_value("progress_tick_ms", "250").unwrap();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_value_errors() {
        let mut config = Config::default();
        assert!(config.set_value("colour", "red").is_err());
        assert!(config.set_value("command_timeout_secs", "soon").is_err());
        assert!(config.set_value("command_wire", "telegraph").is_err());

        config.set_value("auth_token", "").unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_zero_timings_are_rejected() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        assert!(config.set_value("command_timeout_secs", "0").is_err());
        assert!(config.set_value("settings_debounce_ms", "0").is_err());
        assert!(config.set_value("progress_tick_ms", "0").is_err());
        assert_eq!(config, Config::default());

        assert!(Config::load_from_str("command_timeout_secs = 0").is_err());

        // Values set in code are clamped rather than trusted
        let config = Config {
            command_timeout_secs: 0,
            settings_debounce_ms: 0,
            ..Config::default()
        };
        let options = config.sync_options();
        assert_eq!(options.command_timeout, Duration::from_secs(1));
        assert_eq!(options.settings_debounce, Duration::from_millis(50));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }
}
