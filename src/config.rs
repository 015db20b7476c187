//! Configuration Module
//!
//! Handles loading store parameters from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::ProcessMode;

/// Store configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the file stores
    pub cache_dir: PathBuf,
    /// Default TTL in seconds for entries without explicit TTL
    pub default_ttl_secs: u64,
    /// Whether stores start enabled
    pub enabled: bool,
    /// Value processing mode of the raw store
    pub process: ProcessMode,
    /// Maximum age in seconds of raw store files, 0 disables the check
    pub max_life_time_secs: u64,
    /// Namespace of the remote store
    pub namespace: String,
    /// Endpoint of the remote store
    pub endpoint: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Directory of the file stores (default: ./cache)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 604800)
    /// - `CACHE_ENABLED` - Start enabled (default: false)
    /// - `CACHE_PROCESS` - Raw store mode: NONE, JSON_ARRAY, JSON_OBJECT, SERIALIZE (default: NONE)
    /// - `MAX_LIFE_TIME` - Raw store maximum file age in seconds (default: 0)
    /// - `CACHE_NAMESPACE` - Remote store namespace (default: default)
    /// - `CACHE_ENDPOINT` - Remote store endpoint (default: memory://default)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            cache_dir: lookup("CACHE_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            default_ttl_secs: parse_or(lookup("DEFAULT_TTL"), defaults.default_ttl_secs),
            enabled: lookup("CACHE_ENABLED")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.enabled),
            process: parse_or(lookup("CACHE_PROCESS"), defaults.process),
            max_life_time_secs: parse_or(lookup("MAX_LIFE_TIME"), defaults.max_life_time_secs),
            namespace: lookup("CACHE_NAMESPACE")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.namespace),
            endpoint: lookup("CACHE_ENDPOINT")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.endpoint),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_life_time(&self) -> Duration {
        Duration::from_secs(self.max_life_time_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            default_ttl_secs: 7 * 24 * 3600,
            enabled: false,
            process: ProcessMode::None,
            max_life_time_secs: 0,
            namespace: "default".to_string(),
            endpoint: "memory://default".to_string(),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
