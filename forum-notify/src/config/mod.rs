//! Application configuration.
//!
//! Everything is read once at startup from environment variables (a `.env`
//! file is loaded by the binary first). The notification core never mutates
//! it.

use crate::logging::DEFAULT_LOG_DIR;
use crate::notification::{DigestSettings, SchedulerConfig, SmtpConfig};

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:forum.db?mode=rwc";

/// Top-level configuration for the notifier.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database URL
    pub database_url: String,
    /// Directory for rolling log files
    pub log_dir: String,
    pub scheduler: SchedulerConfig,
    pub smtp: SmtpConfig,
    pub digest: DigestSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            scheduler: SchedulerConfig::default(),
            smtp: SmtpConfig::default(),
            digest: DigestSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: SQLite URL (default: `sqlite:forum.db?mode=rwc`)
    /// - `LOG_DIR`: log directory (default: `logs`)
    /// - see [`SchedulerConfig::from_env`], [`SmtpConfig::from_env`] and
    ///   [`DigestSettings::from_env`] for the rest
    pub fn from_env() -> crate::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env_string("DATABASE_URL").unwrap_or(defaults.database_url),
            log_dir: env_string("LOG_DIR").unwrap_or(defaults.log_dir),
            scheduler: SchedulerConfig::from_env()?,
            smtp: SmtpConfig::from_env(),
            digest: DigestSettings::from_env(),
        })
    }
}

/// Read a non-empty, trimmed environment variable.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse an environment variable, ignoring unparsable values.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Read a boolean flag. `None` when unset.
pub(crate) fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
