use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_UPDATE_COOLDOWN_SECS: u64 = 30;

const ENV_API_URL: &str = "GREENIE_API_URL";
const ENV_UPDATE_FEED: &str = "GREENIE_UPDATE_FEED";
const ENV_DATA_DIR: &str = "GREENIE_DATA_DIR";

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub api_url: String,
    pub update_feed_url: Option<String>,
    pub update_check_interval: Duration,
    pub update_error_cooldown: Duration,
    /// Replace the fixed greeting with the backend's `/welcome` message.
    pub server_welcome: bool,
    pub data_dir: PathBuf,
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_url: Option<String>,
    update_feed_url: Option<String>,
    update_check_interval_secs: Option<u64>,
    update_error_cooldown_secs: Option<u64>,
    server_welcome: Option<bool>,
    data_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("greenie")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("greenie").join("config.toml"))
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            update_feed_url: None,
            update_check_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            update_error_cooldown: Duration::from_secs(DEFAULT_UPDATE_COOLDOWN_SECS),
            server_welcome: false,
            data_dir: default_data_dir(),
        }
    }
}

impl OverlayConfig {
    /// Loads `path` if it exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if path.exists() => read_config_file(path)?,
            _ => ConfigFile::default(),
        };
        let mut config = Self::from_file(file)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            api_url: match file.api_url {
                Some(url) => normalize_url("api_url", &url)?,
                None => defaults.api_url,
            },
            update_feed_url: file.update_feed_url.filter(|url| !url.trim().is_empty()),
            update_check_interval: file
                .update_check_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.update_check_interval),
            update_error_cooldown: file
                .update_error_cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.update_error_cooldown),
            server_welcome: file.server_welcome.unwrap_or(defaults.server_welcome),
            data_dir: file.data_dir.unwrap_or(defaults.data_dir),
        };

        if config.update_check_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "update_check_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = normalize_url("GREENIE_API_URL", &url)?;
        }
        if let Some(feed) = lookup(ENV_UPDATE_FEED) {
            self.update_feed_url = Some(feed).filter(|feed| !feed.trim().is_empty());
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn update_staging_dir(&self) -> PathBuf {
        self.data_dir.join("updates")
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

fn normalize_url(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            key,
            message: format!("expected an http(s) URL, got '{raw}'"),
        });
    }
    Ok(trimmed.to_string())
}
