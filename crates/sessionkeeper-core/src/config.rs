//! Application configuration management.
//!
//! Configuration comes from three layers, later ones winning:
//! built-in defaults, an optional JSON file, and environment variables.
//!
//! The JSON file is read from `$SESSIONKEEPER_CONFIG` when set, otherwise
//! from `~/.config/sessionkeeper/config.json` if it exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::refresh::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_ROTATE_URL};
use crate::scheduler::{
    SchedulerConfig, DEFAULT_CYCLE_INTERVAL_SECS, DEFAULT_EMPTY_BACKOFF_SECS,
    DEFAULT_ERROR_BACKOFF_SECS,
};
use crate::session::Session;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionkeeper";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Database file name in the data directory
const DATABASE_FILE: &str = "sessions.db";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "SESSIONKEEPER_CONFIG";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: Option<String>,
    pub rotate_url: String,
    pub proxy: Option<String>,
    pub request_timeout_secs: u64,
    pub cycle_interval_secs: u64,
    pub empty_backoff_secs: u64,
    pub error_backoff_secs: u64,
    pub log_dir: Option<PathBuf>,
    pub init_session_id: Option<String>,
    pub init_secret_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            rotate_url: DEFAULT_ROTATE_URL.to_string(),
            proxy: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            empty_backoff_secs: DEFAULT_EMPTY_BACKOFF_SECS,
            error_backoff_secs: DEFAULT_ERROR_BACKOFF_SECS,
            log_dir: None,
            init_session_id: None,
            init_secret_token: None,
        }
    }
}

impl Config {
    /// Load file config (if any), then apply the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path()? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn config_path() -> Result<Option<PathBuf>> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(Some(PathBuf::from(path)));
        }
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(None);
        };
        let path = config_dir.join(APP_NAME).join(CONFIG_FILE);
        Ok(path.exists().then_some(path))
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| -> Result<Option<u64>> {
            non_empty(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .with_context(|| format!("{} must be a whole number of seconds", key))
                })
                .transpose()
        };

        if let Some(v) = non_empty("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = non_empty("ROTATE_URL") {
            self.rotate_url = v;
        }
        if let Some(v) = non_empty("ROTATE_PROXY") {
            self.proxy = Some(v);
        }
        if let Some(v) = secs("REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = secs("CYCLE_INTERVAL_SECS")? {
            self.cycle_interval_secs = v;
        }
        if let Some(v) = secs("EMPTY_BACKOFF_SECS")? {
            self.empty_backoff_secs = v;
        }
        if let Some(v) = secs("ERROR_BACKOFF_SECS")? {
            self.error_backoff_secs = v;
        }
        if let Some(v) = non_empty("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty("INIT_SECURE_1PSID") {
            self.init_session_id = Some(v);
        }
        if let Some(v) = non_empty("INIT_SECURE_1PSIDTS") {
            self.init_secret_token = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("cycle_interval_secs", self.cycle_interval_secs),
            ("empty_backoff_secs", self.empty_backoff_secs),
            ("error_backoff_secs", self.error_backoff_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Configured database URL, or a SQLite file in the user data directory.
    pub fn database_url(&self) -> Result<String> {
        if let Some(ref url) = self.database_url {
            return Ok(url.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        let path = data_dir.join(APP_NAME).join(DATABASE_FILE);
        Ok(format!("sqlite://{}", path.display()))
    }

    /// The startup session pair, only when both halves are present.
    pub fn bootstrap_session(&self) -> Option<Session> {
        match (&self.init_session_id, &self.init_secret_token) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(Session::new(id.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            empty_backoff: Duration::from_secs(self.empty_backoff_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }
}
