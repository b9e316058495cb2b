//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "courier.toml",
    "config.toml",
    "./config/courier.toml",
    "/etc/courier/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    search_paths: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_path: None,
            search_paths: true,
        }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
            search_paths: true,
        }
    }

    /// Skip the standard search paths (explicit path and `COURIER_CONFIG` only)
    pub fn without_search_paths(mut self) -> Self {
        self.search_paths = false;
        self
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, then validate it.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("COURIER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if !self.search_paths {
            return None;
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        // Modules
        if let Some(enabled) = parse_env::<bool>("COURIER_QUEUE_ENABLED")? {
            config.queue.enabled = enabled;
        }
        if let Some(enabled) = parse_env::<bool>("COURIER_TOPIC_ENABLED")? {
            config.topic.enabled = enabled;
        }

        // Breaker
        if let Some(threshold) = parse_env("COURIER_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = threshold;
        }
        if let Some(threshold) = parse_env("COURIER_BREAKER_SUCCESS_THRESHOLD")? {
            config.breaker.success_threshold = threshold;
        }
        if let Some(secs) = parse_env("COURIER_BREAKER_WAIT_DURATION_SECS")? {
            config.breaker.wait_duration_secs = secs;
        }
        if let Some(size) = parse_env("COURIER_BREAKER_BUFFER_SIZE")? {
            config.breaker.buffer_size = size;
        }

        // Backoff
        if let Some(ms) = parse_env("COURIER_BACKOFF_BASE_DELAY_MS")? {
            config.backoff.base_delay_ms = ms;
        }
        if let Some(ms) = parse_env("COURIER_BACKOFF_MAX_DELAY_MS")? {
            config.backoff.max_delay_ms = ms;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and parse an environment variable. Unset is `None`; a value that
/// does not parse is an error rather than a silent fallback.
fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvError(format!("{} has invalid value '{}'", name, val))),
        Err(_) => Ok(None),
    }
}
